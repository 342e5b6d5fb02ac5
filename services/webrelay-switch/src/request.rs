//! Inbound request model
//!
//! Requests are reduced to a method, a path and a flat list of parameters
//! before they reach the router, so routing and validation can be tested
//! without an HTTP server.

use std::fmt;

/// HTTP verb of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Split a URL path into its non-empty segments.
///
/// Any query string or fragment is ignored.
pub fn tokenize_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Target of a request, derived from its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/api/v1/switch/{device_number}/{action}` or `/switch/{device_number}/{action}`
    Switch {
        device_number: String,
        action: String,
    },
    /// `/management/apiversions`
    ApiVersions,
    /// `/management/v1/description`
    ManagementDescription,
    /// `/management/v1/configureddevices`
    ConfiguredDevices,
    /// `/setup`
    Setup,
    NotFound,
}

/// Classify a path. Segment matching is case-insensitive.
pub fn parse_route(path: &str) -> Route {
    let tokens: Vec<String> = tokenize_path(path)
        .into_iter()
        .map(str::to_ascii_lowercase)
        .collect();
    let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();

    match tokens.as_slice() {
        ["api", "v1", "switch", device_number, action] | ["switch", device_number, action] => {
            Route::Switch {
                device_number: device_number.to_string(),
                action: action.to_string(),
            }
        }
        ["management", "apiversions"] => Route::ApiVersions,
        ["management", "v1", "description"] => Route::ManagementDescription,
        ["management", "v1", "configureddevices"] => Route::ConfiguredDevices,
        ["setup"] => Route::Setup,
        _ => Route::NotFound,
    }
}

/// A request as seen by the router
#[derive(Debug, Clone)]
pub struct AlpacaRequest {
    pub method: Method,
    pub path: String,
    params: Vec<(String, String)>,
}

impl AlpacaRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.params.extend(params);
        self
    }

    /// Value of the first parameter called `name`, ignoring case
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `ClientID` parameter, 0 when absent or malformed
    pub fn client_id(&self) -> u32 {
        self.numeric_param("ClientID")
    }

    /// `ClientTransactionID` parameter, 0 when absent or malformed
    pub fn client_transaction_id(&self) -> u32 {
        self.numeric_param("ClientTransactionID")
    }

    fn numeric_param(&self, name: &str) -> u32 {
        self.param(name)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}
