//! Tests for request validation and dispatch
//!
//! Requests are dispatched straight to a device booted from an in-memory
//! store, without an HTTP server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use webrelay_switch::persistence::{encode, PersistedState};
use webrelay_switch::{
    AlpacaErrorCode, AlpacaRequest, AlpacaResponse, Config, Eeprom, MemoryEeprom, Method,
    RequestRouter, Result, SimulatedDriver, SwitchDevice, SwitchDriver, SwitchError, SwitchType,
    STORE_SIZE,
};

const INVALID_VALUE: Option<AlpacaErrorCode> = Some(AlpacaErrorCode::InvalidValue);
const INVALID_OPERATION: Option<AlpacaErrorCode> = Some(AlpacaErrorCode::InvalidOperation);

/// Every switch-scoped action with the verb it accepts and a valid payload
const SWITCH_SCOPED: &[(Method, &str, Option<(&str, &str)>)] = &[
    (Method::Get, "canwrite", None),
    (Method::Get, "getswitch", None),
    (Method::Put, "setswitch", Some(("State", "true"))),
    (Method::Get, "getswitchdescription", None),
    (Method::Get, "getswitchname", None),
    (Method::Put, "setswitchname", Some(("Name", "Roof"))),
    (Method::Get, "getswitchvalue", None),
    (Method::Put, "setswitchvalue", Some(("Value", "1"))),
    (Method::Get, "minswitchvalue", None),
    (Method::Get, "maxswitchvalue", None),
    (Method::Get, "switchstep", None),
    (Method::Get, "getswitchtype", None),
    (Method::Put, "setswitchtype", Some(("Type", "PWM"))),
];

fn boot(store: MemoryEeprom, driver: Arc<dyn SwitchDriver>) -> SwitchDevice {
    SwitchDevice::boot(Config::default(), Box::new(store), driver)
}

fn default_device() -> SwitchDevice {
    boot(
        MemoryEeprom::new(STORE_SIZE),
        Arc::new(SimulatedDriver::new()),
    )
}

/// Device whose switch 5 is a PWM channel with range [0, 1023]
fn pwm_device(driver: Arc<dyn SwitchDriver>) -> SwitchDevice {
    let mut state = PersistedState::defaults();
    state
        .registry
        .mutate(5, |entry| {
            entry.switch_type = SwitchType::Pwm;
            entry.max = 1023.0;
            entry.value = 100.0;
        })
        .unwrap();
    let mut store = MemoryEeprom::new(STORE_SIZE);
    encode(&state, &mut store).unwrap();
    boot(store, driver)
}

fn get(action: &str) -> AlpacaRequest {
    AlpacaRequest::new(Method::Get, format!("/api/v1/switch/0/{}", action))
}

fn put(action: &str) -> AlpacaRequest {
    AlpacaRequest::new(Method::Put, format!("/api/v1/switch/0/{}", action))
}

async fn send(device: &mut SwitchDevice, request: AlpacaRequest) -> AlpacaResponse {
    RequestRouter::new()
        .dispatch(device, &request)
        .await
        .response
}

struct FailingDriver;

#[async_trait]
impl SwitchDriver for FailingDriver {
    async fn write_relay(&self, _pin: u8, _energized: bool) -> Result<()> {
        Err(SwitchError::Hardware("relay board not responding".to_string()))
    }

    async fn write_output(&self, _pin: u8, _value: f64) -> Result<()> {
        Err(SwitchError::Hardware("dac not responding".to_string()))
    }
}

#[tokio::test]
async fn test_relay_state_round_trip() {
    let driver = Arc::new(SimulatedDriver::new());
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), driver.clone());

    let response = send(
        &mut device,
        put("setswitch").with_param("Id", "2").with_param("State", "true"),
    )
    .await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(device.entry(2).unwrap().value, 1.0);
    assert_eq!(driver.level(2).await, Some(1.0));

    let response = send(&mut device, get("getswitch").with_param("Id", "2")).await;
    assert_eq!(response.value, Some(json!(true)));

    let response = send(&mut device, get("getswitchvalue").with_param("Id", "2")).await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_normally_closed_relay_inverts_coil() {
    let driver = Arc::new(SimulatedDriver::new());
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), driver.clone());
    send(
        &mut device,
        put("setswitchtype").with_param("Id", "1").with_param("Type", "RelayNC"),
    )
    .await;

    send(
        &mut device,
        put("setswitch").with_param("Id", "1").with_param("State", "True"),
    )
    .await;

    assert_eq!(driver.level(1).await, Some(0.0));
    let response = send(&mut device, get("getswitch").with_param("Id", "1")).await;
    assert_eq!(response.value, Some(json!(true)));
}

#[tokio::test]
async fn test_type_change_drives_coil_to_match() {
    let driver = Arc::new(SimulatedDriver::new());
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), driver.clone());
    send(
        &mut device,
        put("setswitch").with_param("Id", "3").with_param("State", "true"),
    )
    .await;
    assert_eq!(driver.level(3).await, Some(1.0));

    let response = send(
        &mut device,
        put("setswitchtype").with_param("Id", "3").with_param("Type", "RelayNC"),
    )
    .await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(driver.level(3).await, Some(0.0));
    let response = send(&mut device, get("getswitch").with_param("Id", "3")).await;
    assert_eq!(response.value, Some(json!(true)));

    send(
        &mut device,
        put("setswitchtype").with_param("Id", "3").with_param("Type", "DAC"),
    )
    .await;
    assert_eq!(driver.level(3).await, Some(1.0));
    assert_eq!(device.entry(3).unwrap().value, 1.0);
}

#[tokio::test]
async fn test_type_change_rejected_by_hardware_keeps_type() {
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), Arc::new(FailingDriver));

    let response = send(
        &mut device,
        put("setswitchtype").with_param("Id", "0").with_param("Type", "RelayNC"),
    )
    .await;

    assert_eq!(response.error_code(), INVALID_OPERATION);
    assert_eq!(device.switch_type(0).unwrap(), SwitchType::RelayNo);
}

#[tokio::test]
async fn test_shrinking_releases_dropped_relays() {
    let driver = Arc::new(SimulatedDriver::new());
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), driver.clone());
    send(
        &mut device,
        put("setswitch").with_param("Id", "6").with_param("State", "true"),
    )
    .await;
    assert_eq!(driver.level(6).await, Some(1.0));

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/setup").with_param("numSwitches", "4"),
    )
    .await;

    assert!(response.is_success(), "{:?}", response);
    assert_eq!(device.registry().len(), 4);
    assert_eq!(driver.level(6).await, Some(0.0));
    assert_eq!(driver.level(7).await, Some(0.0));
}

#[tokio::test]
async fn test_pwm_value_out_of_range_is_rejected() {
    let mut device = pwm_device(Arc::new(SimulatedDriver::new()));

    let response = send(
        &mut device,
        put("setswitchvalue").with_param("Id", "5").with_param("Value", "2000"),
    )
    .await;

    assert_eq!(response.error_code(), INVALID_VALUE);
    assert_eq!(device.entry(5).unwrap().value, 100.0);
}

#[tokio::test]
async fn test_pwm_value_round_trip() {
    let driver = Arc::new(SimulatedDriver::new());
    let mut device = pwm_device(driver.clone());

    let response = send(
        &mut device,
        put("setswitchvalue").with_param("Id", "5").with_param("Value", "1023"),
    )
    .await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(driver.level(5).await, Some(1023.0));

    let response = send(&mut device, get("getswitchvalue").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!(1023.0)));

    let response = send(&mut device, get("getswitch").with_param("Id", "5")).await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_missing_id_is_invalid_operation() {
    let mut device = default_device();
    for (method, action, payload) in SWITCH_SCOPED {
        let mut request = AlpacaRequest::new(*method, format!("/api/v1/switch/0/{}", action));
        if let Some((name, value)) = payload {
            request = request.with_param(*name, *value);
        }

        let response = send(&mut device, request).await;

        assert_eq!(response.error_code(), INVALID_OPERATION, "{}", action);
        assert_eq!(response.error_message, "Missing argument: Id", "{}", action);
    }
}

#[tokio::test]
async fn test_id_out_of_range_is_invalid_value() {
    let mut device = default_device();
    for (method, action, payload) in SWITCH_SCOPED {
        for id in ["8", "-1", "two", "99999999999999999999"] {
            let mut request = AlpacaRequest::new(*method, format!("/api/v1/switch/0/{}", action))
                .with_param("Id", id);
            if let Some((name, value)) = payload {
                request = request.with_param(*name, *value);
            }

            let response = send(&mut device, request).await;

            assert_eq!(response.error_code(), INVALID_VALUE, "{} Id={}", action, id);
        }
    }
}

#[tokio::test]
async fn test_out_of_range_id_is_reported_before_wrong_verb() {
    let mut device = default_device();

    let response = send(&mut device, put("getswitch").with_param("Id", "42")).await;

    assert_eq!(response.error_code(), INVALID_VALUE);
}

#[tokio::test]
async fn test_wrong_verb_is_invalid_operation() {
    let mut device = default_device();

    let response = send(&mut device, get("setswitch").with_param("Id", "0")).await;
    assert_eq!(response.error_code(), INVALID_OPERATION);

    let response = send(
        &mut device,
        put("getswitchname").with_param("Id", "0").with_param("Name", "x"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/api/v1/switch/0/maxswitch"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_type_is_checked_before_payload() {
    let mut device = pwm_device(Arc::new(SimulatedDriver::new()));

    let response = send(
        &mut device,
        put("setswitch").with_param("Id", "5").with_param("State", "maybe"),
    )
    .await;

    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_missing_and_malformed_payloads() {
    let mut device = default_device();

    let response = send(&mut device, put("setswitch").with_param("Id", "0")).await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
    assert_eq!(response.error_message, "Missing argument: State");

    let response = send(
        &mut device,
        put("setswitch").with_param("Id", "0").with_param("State", "on"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_VALUE);

    let response = send(
        &mut device,
        put("setswitchtype").with_param("Id", "0").with_param("Type", "servo"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_VALUE);
    assert_eq!(device.switch_type(0).unwrap(), SwitchType::RelayNo);
}

#[tokio::test]
async fn test_non_finite_value_is_invalid_value() {
    let mut device = pwm_device(Arc::new(SimulatedDriver::new()));

    let response = send(
        &mut device,
        put("setswitchvalue").with_param("Id", "5").with_param("Value", "NaN"),
    )
    .await;

    assert_eq!(response.error_code(), INVALID_VALUE);
}

#[tokio::test]
async fn test_switch_name_round_trip_and_length_limit() {
    let mut device = default_device();

    let response = send(
        &mut device,
        put("setswitchname")
            .with_param("Id", "3")
            .with_param("Name", "Flat panel"),
    )
    .await;
    assert!(response.is_success());
    let response = send(&mut device, get("getswitchname").with_param("Id", "3")).await;
    assert_eq!(response.value, Some(json!("Flat panel")));

    let response = send(
        &mut device,
        put("setswitchname")
            .with_param("Id", "3")
            .with_param("Name", "A name that is far too long to store"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_VALUE);
    assert_eq!(device.switch_name(3).unwrap(), "Flat panel");
}

#[tokio::test]
async fn test_static_properties() {
    let mut device = pwm_device(Arc::new(SimulatedDriver::new()));

    let response = send(&mut device, get("maxswitch")).await;
    assert_eq!(response.value, Some(json!(8)));

    let response = send(&mut device, get("maxswitchvalue").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!(1023.0)));

    let response = send(&mut device, get("minswitchvalue").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!(0.0)));

    let response = send(&mut device, get("switchstep").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!(1.0)));

    let response = send(&mut device, get("canwrite").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!(true)));

    let response = send(
        &mut device,
        get("getswitchdescription").with_param("Id", "5"),
    )
    .await;
    assert_eq!(response.value, Some(json!("Default description")));

    let response = send(&mut device, get("getswitchtype").with_param("Id", "5")).await;
    assert_eq!(response.value, Some(json!("PWM")));
}

#[tokio::test]
async fn test_read_only_switch_rejects_writes() {
    let mut device = default_device();
    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/setup").with_param("numSwitches", "10"),
    )
    .await;
    assert!(response.is_success(), "{:?}", response);

    let response = send(&mut device, get("canwrite").with_param("Id", "9")).await;
    assert_eq!(response.value, Some(json!(false)));

    let response = send(
        &mut device,
        put("setswitch").with_param("Id", "9").with_param("State", "true"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
    assert!(!device.get_switch(9).unwrap());

    let response = send(
        &mut device,
        put("setswitchname").with_param("Id", "9").with_param("Name", "Spare"),
    )
    .await;
    assert!(response.is_success());
}

#[tokio::test]
async fn test_hardware_failure_leaves_state_unchanged() {
    let mut device = boot(MemoryEeprom::new(STORE_SIZE), Arc::new(FailingDriver));

    let response = send(
        &mut device,
        put("setswitch").with_param("Id", "0").with_param("State", "true"),
    )
    .await;

    assert_eq!(response.error_code(), INVALID_OPERATION);
    assert!(!device.get_switch(0).unwrap());
}

#[tokio::test]
async fn test_envelope_echoes_client_identifiers() {
    let mut device = default_device();

    let first = send(
        &mut device,
        get("maxswitch")
            .with_param("ClientID", "17")
            .with_param("ClientTransactionID", "1234"),
    )
    .await;
    let second = send(&mut device, get("getswitch")).await;

    assert_eq!(first.client_id, 17);
    assert_eq!(first.client_transaction_id, 1234);
    assert_eq!(first.error_number, 0);
    assert_eq!(first.error_message, "");
    assert_eq!(second.client_id, 0);
    assert_eq!(second.server_transaction_id, first.server_transaction_id + 1);
    assert!(second.value.is_none());
}

#[tokio::test]
async fn test_paths_and_parameters_ignore_case() {
    let mut device = default_device();

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/API/V1/Switch/0/GetSwitchName").with_param("ID", "1"),
    )
    .await;
    assert_eq!(response.value, Some(json!("Switch_1")));

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/switch/0/getswitchname").with_param("id", "1"),
    )
    .await;
    assert_eq!(response.value, Some(json!("Switch_1")));
}

#[tokio::test]
async fn test_unknown_device_and_action() {
    let mut device = default_device();

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/api/v1/switch/1/maxswitch"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);

    let response = send(&mut device, get("frobnicate")).await;
    assert_eq!(response.error_code(), INVALID_OPERATION);

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/api/v1/dome/0/athome"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_status_snapshot() {
    let mut device = default_device();

    let response = send(&mut device, get("status")).await;

    let value = response.value.unwrap();
    assert_eq!(value["Host"], "espRLY01");
    assert_eq!(value["DiscoveryPort"], 32227);
    assert_eq!(device.discovery_port(), 32227);
    assert_eq!(value["Switches"].as_array().unwrap().len(), 8);
    assert_eq!(value["Switches"][7]["Name"], "Switch_7");
    assert!(value["Time"].is_string());
}

#[tokio::test]
async fn test_common_device_endpoints() {
    let mut device = default_device();

    let response = send(&mut device, get("connected")).await;
    assert_eq!(response.value, Some(json!(false)));
    let response = send(&mut device, put("connected").with_param("Connected", "true")).await;
    assert!(response.is_success());
    let response = send(&mut device, get("connected")).await;
    assert_eq!(response.value, Some(json!(true)));

    let response = send(&mut device, get("interfaceversion")).await;
    assert_eq!(response.value, Some(json!(2)));
    let response = send(&mut device, get("name")).await;
    assert_eq!(response.value, Some(json!("Web Relay Switch")));
    let response = send(&mut device, get("supportedactions")).await;
    assert_eq!(response.value, Some(json!([])));
    let response = send(&mut device, get("driverversion")).await;
    assert_eq!(response.value, Some(json!(env!("CARGO_PKG_VERSION"))));
}

#[tokio::test]
async fn test_management_endpoints() {
    let mut device = default_device();

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/management/apiversions"),
    )
    .await;
    assert_eq!(response.value, Some(json!([1])));

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/management/v1/description"),
    )
    .await;
    assert_eq!(response.value.unwrap()["ServerName"], "espRLY01");

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Get, "/management/v1/configureddevices"),
    )
    .await;
    let devices = response.value.unwrap();
    assert_eq!(devices[0]["DeviceType"], "Switch");
    assert_eq!(devices[0]["DeviceNumber"], 0);
    assert_eq!(devices[0]["UniqueID"], "webrelay-switch-001");

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Put, "/management/apiversions"),
    )
    .await;
    assert_eq!(response.error_code(), INVALID_OPERATION);
}

#[tokio::test]
async fn test_setup_hostname_requests_restart() {
    let mut device = default_device();
    let router = RequestRouter::new();

    let outcome = router
        .dispatch(
            &mut device,
            &AlpacaRequest::new(Method::Post, "/setup").with_param("hostname", "dome-relays"),
        )
        .await;

    assert!(outcome.response.is_success());
    assert!(outcome.restart);
    device.reboot();
    assert_eq!(device.hostname(), "dome-relays");
}

#[tokio::test]
async fn test_setup_rejects_invalid_input() {
    let mut device = default_device();
    let router = RequestRouter::new();

    for (name, value) in [
        ("hostname", "not a hostname"),
        ("hostname", ""),
        ("numSwitches", "17"),
        ("numSwitches", "many"),
        ("factoryReset", "perhaps"),
    ] {
        let outcome = router
            .dispatch(
                &mut device,
                &AlpacaRequest::new(Method::Post, "/setup").with_param(name, value),
            )
            .await;
        assert_eq!(outcome.response.error_code(), INVALID_VALUE, "{}={}", name, value);
        assert!(!outcome.restart);
    }
    assert_eq!(device.hostname(), "espRLY01");
    assert_eq!(device.max_switch(), 8);

    let outcome = router
        .dispatch(&mut device, &AlpacaRequest::new(Method::Post, "/setup"))
        .await;
    assert_eq!(outcome.response.error_code(), INVALID_OPERATION);

    let outcome = router
        .dispatch(
            &mut device,
            &AlpacaRequest::new(Method::Get, "/setup").with_param("numSwitches", "4"),
        )
        .await;
    assert_eq!(outcome.response.error_code(), INVALID_OPERATION);
    assert_eq!(device.max_switch(), 8);
}

#[tokio::test]
async fn test_setup_resize_and_factory_reset() {
    let mut device = default_device();

    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/setup").with_param("numSwitches", "3"),
    )
    .await;
    assert!(response.is_success());
    let response = send(&mut device, get("maxswitch")).await;
    assert_eq!(response.value, Some(json!(3)));

    send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/setup").with_param("hostname", "renamed"),
    )
    .await;
    let response = send(
        &mut device,
        AlpacaRequest::new(Method::Post, "/setup").with_param("factoryReset", "true"),
    )
    .await;
    assert!(response.is_success());
    assert_eq!(device.max_switch(), 8);
    assert_eq!(device.hostname(), "espRLY01");
}

#[tokio::test]
async fn test_switch_state_survives_reboot() {
    let mut device = pwm_device(Arc::new(SimulatedDriver::new()));
    send(
        &mut device,
        put("setswitch").with_param("Id", "0").with_param("State", "true"),
    )
    .await;
    send(
        &mut device,
        put("setswitchvalue").with_param("Id", "5").with_param("Value", "700"),
    )
    .await;

    device.reboot();

    assert!(device.get_switch(0).unwrap());
    assert_eq!(device.get_switch_value(5).unwrap(), 700.0);
}

#[tokio::test]
async fn test_switch_state_not_persisted_when_disabled() {
    let mut config = Config::default();
    config.storage.persist_switch_state = false;
    let mut device = SwitchDevice::boot(
        config,
        Box::new(MemoryEeprom::new(STORE_SIZE)),
        Arc::new(SimulatedDriver::new()),
    );
    let mut sentinel = [0u8; 1];
    device.store().read(0, &mut sentinel).unwrap();
    assert_eq!(sentinel[0], b'*');

    send(
        &mut device,
        put("setswitch").with_param("Id", "0").with_param("State", "true"),
    )
    .await;
    device.reboot();

    assert!(!device.get_switch(0).unwrap());
}
