//! Request validation and dispatch
//!
//! The router turns an [`AlpacaRequest`] into a call on the [`SwitchDevice`]
//! and renders the result into an [`AlpacaResponse`]. Switch-scoped actions
//! are validated in a fixed order:
//!
//! 1. required arguments are present, else `InvalidOperation`
//! 2. `Id` names an existing switch, else `InvalidValue`
//! 3. the verb and the switch type permit the operation, else `InvalidOperation`
//!
//! Only then is the payload parsed and the operation executed.

use std::str::FromStr;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::device::SwitchDevice;
use crate::error::{Result, SwitchError};
use crate::request::{parse_route, AlpacaRequest, Method, Route};
use crate::response::{AlpacaResponse, Transaction};
use crate::switches::{SwitchType, MAX_SWITCHES};

/// Alpaca interface version implemented by the switch device
pub const INTERFACE_VERSION: i32 = 2;

const MANUFACTURER: &str = "Rusty Photon";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    MaxSwitch,
    CanWrite,
    GetSwitch,
    SetSwitch,
    GetSwitchDescription,
    GetSwitchName,
    SetSwitchName,
    GetSwitchValue,
    SetSwitchValue,
    MinSwitchValue,
    MaxSwitchValue,
    SwitchStep,
    GetSwitchType,
    SetSwitchType,
    Status,
    GetConnected,
    SetConnected,
    Description,
    DriverInfo,
    DriverVersion,
    InterfaceVersion,
    Name,
    SupportedActions,
}

impl Endpoint {
    /// Whether the endpoint addresses a single switch through `Id`
    fn needs_id(self) -> bool {
        matches!(
            self,
            Endpoint::CanWrite
                | Endpoint::GetSwitch
                | Endpoint::SetSwitch
                | Endpoint::GetSwitchDescription
                | Endpoint::GetSwitchName
                | Endpoint::SetSwitchName
                | Endpoint::GetSwitchValue
                | Endpoint::SetSwitchValue
                | Endpoint::MinSwitchValue
                | Endpoint::MaxSwitchValue
                | Endpoint::SwitchStep
                | Endpoint::GetSwitchType
                | Endpoint::SetSwitchType
        )
    }

    /// Parameter carrying the value written by the endpoint
    fn payload(self) -> Option<&'static str> {
        match self {
            Endpoint::SetSwitch => Some("State"),
            Endpoint::SetSwitchName => Some("Name"),
            Endpoint::SetSwitchValue => Some("Value"),
            Endpoint::SetSwitchType => Some("Type"),
            Endpoint::SetConnected => Some("Connected"),
            _ => None,
        }
    }
}

/// Action name, accepted verb and endpoint. An action may appear once per verb.
const ACTIONS: &[(&str, Method, Endpoint)] = &[
    ("maxswitch", Method::Get, Endpoint::MaxSwitch),
    ("canwrite", Method::Get, Endpoint::CanWrite),
    ("getswitch", Method::Get, Endpoint::GetSwitch),
    ("setswitch", Method::Put, Endpoint::SetSwitch),
    ("getswitchdescription", Method::Get, Endpoint::GetSwitchDescription),
    ("getswitchname", Method::Get, Endpoint::GetSwitchName),
    ("setswitchname", Method::Put, Endpoint::SetSwitchName),
    ("getswitchvalue", Method::Get, Endpoint::GetSwitchValue),
    ("setswitchvalue", Method::Put, Endpoint::SetSwitchValue),
    ("minswitchvalue", Method::Get, Endpoint::MinSwitchValue),
    ("maxswitchvalue", Method::Get, Endpoint::MaxSwitchValue),
    ("switchstep", Method::Get, Endpoint::SwitchStep),
    ("getswitchtype", Method::Get, Endpoint::GetSwitchType),
    ("setswitchtype", Method::Put, Endpoint::SetSwitchType),
    ("status", Method::Get, Endpoint::Status),
    ("connected", Method::Get, Endpoint::GetConnected),
    ("connected", Method::Put, Endpoint::SetConnected),
    ("description", Method::Get, Endpoint::Description),
    ("driverinfo", Method::Get, Endpoint::DriverInfo),
    ("driverversion", Method::Get, Endpoint::DriverVersion),
    ("interfaceversion", Method::Get, Endpoint::InterfaceVersion),
    ("name", Method::Get, Endpoint::Name),
    ("supportedactions", Method::Get, Endpoint::SupportedActions),
];

/// Result of dispatching one request
#[derive(Debug, Clone)]
pub struct Outcome {
    pub response: AlpacaResponse,
    /// The device must be rebuilt from the store once the response is sent
    pub restart: bool,
}

/// Stateless dispatcher from requests to device operations
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestRouter;

impl RequestRouter {
    pub fn new() -> Self {
        Self
    }

    /// Validate and execute `request` against `device`
    pub async fn dispatch(&self, device: &mut SwitchDevice, request: &AlpacaRequest) -> Outcome {
        let transaction = Transaction {
            client_id: request.client_id(),
            client_transaction_id: request.client_transaction_id(),
            server_transaction_id: device.next_transaction_id(),
        };
        debug!(
            "{} {} (transaction {})",
            request.method, request.path, transaction.server_transaction_id
        );

        let mut restart = false;
        let result = match parse_route(&request.path) {
            Route::Switch {
                device_number,
                action,
            } => self.switch_action(device, request, &device_number, &action).await,
            Route::ApiVersions => management(request, "apiversions", || Ok(json!([1]))),
            Route::ManagementDescription => {
                management(request, "description", || Ok(server_description(device)))
            }
            Route::ConfiguredDevices => {
                management(request, "configureddevices", || Ok(configured_devices(device)))
            }
            Route::Setup => setup(device, request).await.map(|(value, needs_restart)| {
                restart = needs_restart;
                value
            }),
            Route::NotFound => Err(SwitchError::UnknownAction(request.path.clone())),
        };

        let response = match result {
            Ok(value) => AlpacaResponse::success(transaction, value),
            Err(e) => {
                warn!("Rejected {} {}: {}", request.method, request.path, e);
                AlpacaResponse::failure(transaction, &e)
            }
        };
        Outcome { response, restart }
    }

    async fn switch_action(
        &self,
        device: &mut SwitchDevice,
        request: &AlpacaRequest,
        device_number: &str,
        action: &str,
    ) -> Result<Option<Value>> {
        let configured = device.config().device.device_number;
        if device_number.parse::<u32>().ok() != Some(configured) {
            return Err(SwitchError::UnknownDevice(device_number.to_string()));
        }

        let rows: Vec<(Method, Endpoint)> = ACTIONS
            .iter()
            .filter(|(name, _, _)| *name == action)
            .map(|(_, method, endpoint)| (*method, *endpoint))
            .collect();
        let Some((_, first)) = rows.first().copied() else {
            return Err(SwitchError::UnknownAction(action.to_string()));
        };
        let matched = rows
            .iter()
            .find(|(method, _)| *method == request.method)
            .map(|(_, endpoint)| *endpoint);

        // (a) required arguments
        let raw_id = if first.needs_id() {
            Some(request.param("Id").ok_or(SwitchError::MissingArgument("Id"))?)
        } else {
            None
        };
        if let Some(name) = matched.and_then(Endpoint::payload) {
            request.param(name).ok_or(SwitchError::MissingArgument(name))?;
        }

        // (b) switch id in range
        let id = raw_id.map(|raw| parse_id(device, raw)).transpose()?;

        // (c) verb, then switch type
        let endpoint = matched.ok_or_else(|| SwitchError::MethodNotAllowed {
            method: request.method.to_string(),
            action: action.to_string(),
        })?;
        let id = id.unwrap_or_default();
        match endpoint {
            Endpoint::GetSwitch => {
                device.relay_entry(id, "getswitch")?;
            }
            Endpoint::SetSwitch => {
                device.relay_entry(id, "setswitch")?;
            }
            Endpoint::GetSwitchValue => {
                device.output_entry(id, "getswitchvalue")?;
            }
            Endpoint::SetSwitchValue => {
                device.output_entry(id, "setswitchvalue")?;
            }
            _ => {}
        }

        execute(device, request, endpoint, id).await
    }
}

async fn execute(
    device: &mut SwitchDevice,
    request: &AlpacaRequest,
    endpoint: Endpoint,
    id: usize,
) -> Result<Option<Value>> {
    let payload = move || {
        endpoint
            .payload()
            .and_then(|name| request.param(name))
            .unwrap_or_default()
    };

    let value = match endpoint {
        Endpoint::MaxSwitch => json!(device.max_switch()),
        Endpoint::CanWrite => json!(device.can_write(id)?),
        Endpoint::GetSwitch => json!(device.get_switch(id)?),
        Endpoint::SetSwitch => {
            let state = parse_bool("State", payload())?;
            device.set_switch(id, state).await?;
            return Ok(None);
        }
        Endpoint::GetSwitchDescription => json!(device.switch_description(id)?),
        Endpoint::GetSwitchName => json!(device.switch_name(id)?),
        Endpoint::SetSwitchName => {
            device.set_switch_name(id, payload())?;
            return Ok(None);
        }
        Endpoint::GetSwitchValue => json!(device.get_switch_value(id)?),
        Endpoint::SetSwitchValue => {
            let value = parse_f64("Value", payload())?;
            device.set_switch_value(id, value).await?;
            return Ok(None);
        }
        Endpoint::MinSwitchValue => json!(device.min_switch_value(id)?),
        Endpoint::MaxSwitchValue => json!(device.max_switch_value(id)?),
        Endpoint::SwitchStep => json!(device.switch_step(id)?),
        Endpoint::GetSwitchType => json!(device.switch_type(id)?.to_string()),
        Endpoint::SetSwitchType => {
            let switch_type = SwitchType::from_str(payload())?;
            device.set_switch_type(id, switch_type).await?;
            return Ok(None);
        }
        Endpoint::Status => serde_json::to_value(device.status())?,
        Endpoint::GetConnected => json!(device.connected()),
        Endpoint::SetConnected => {
            let connected = parse_bool("Connected", payload())?;
            device.set_connected(connected);
            return Ok(None);
        }
        Endpoint::Description => json!(device.config().device.description),
        Endpoint::DriverInfo => json!(format!(
            "{} {} switch driver",
            MANUFACTURER,
            env!("CARGO_PKG_NAME")
        )),
        Endpoint::DriverVersion => json!(env!("CARGO_PKG_VERSION")),
        Endpoint::InterfaceVersion => json!(INTERFACE_VERSION),
        Endpoint::Name => json!(device.config().device.name),
        Endpoint::SupportedActions => json!([]),
    };
    Ok(Some(value))
}

fn parse_id(device: &SwitchDevice, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(id) if id < device.max_switch() => Ok(id),
        _ => Err(SwitchError::InvalidSwitchId(raw.to_string())),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(SwitchError::InvalidValue(format!(
            "{} must be true or false, got {:?}",
            name, raw
        ))),
    }
}

fn parse_f64(name: &str, raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SwitchError::InvalidValue(format!(
            "{} must be a finite number, got {:?}",
            name, raw
        ))),
    }
}

fn management(
    request: &AlpacaRequest,
    action: &str,
    value: impl FnOnce() -> Result<Value>,
) -> Result<Option<Value>> {
    if request.method != Method::Get {
        return Err(SwitchError::MethodNotAllowed {
            method: request.method.to_string(),
            action: action.to_string(),
        });
    }
    value().map(Some)
}

fn server_description(device: &SwitchDevice) -> Value {
    json!({
        "ServerName": device.hostname(),
        "Manufacturer": MANUFACTURER,
        "ManufacturerVersion": env!("CARGO_PKG_VERSION"),
        "Location": "",
    })
}

fn configured_devices(device: &SwitchDevice) -> Value {
    let config = &device.config().device;
    json!([{
        "DeviceName": config.name,
        "DeviceType": "Switch",
        "DeviceNumber": config.device_number,
        "UniqueID": config.unique_id,
    }])
}

/// Administrative changes. Only the first of `hostname`, `numSwitches` and
/// `factoryReset` present in the request is applied.
async fn setup(
    device: &mut SwitchDevice,
    request: &AlpacaRequest,
) -> Result<(Option<Value>, bool)> {
    if !matches!(request.method, Method::Post | Method::Put) {
        return Err(SwitchError::MethodNotAllowed {
            method: request.method.to_string(),
            action: "setup".to_string(),
        });
    }

    let restart = if let Some(hostname) = request.param("hostname") {
        device.apply_hostname(hostname.trim())?;
        true
    } else if let Some(raw) = request.param("numSwitches") {
        let count = raw
            .trim()
            .parse::<usize>()
            .map_err(|_| SwitchError::InvalidSwitchCount {
                count: raw.to_string(),
                max: MAX_SWITCHES,
            })?;
        device.apply_resize(count).await?;
        false
    } else if let Some(raw) = request.param("factoryReset") {
        if !parse_bool("factoryReset", raw)? {
            return Ok((Some(serde_json::to_value(device.status())?), false));
        }
        device.factory_reset()?;
        true
    } else {
        return Err(SwitchError::MissingArgument(
            "hostname, numSwitches or factoryReset",
        ));
    };

    Ok((Some(serde_json::to_value(device.status())?), restart))
}
