//! Error types for the webrelay switch server

use crate::response::AlpacaErrorCode;

/// Errors raised while validating or executing a switch request
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid switch ID: {0}")]
    InvalidSwitchId(String),

    #[error("Unknown device number: {0}")]
    UnknownDevice(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("HTTP method {method} is not supported for {action}")]
    MethodNotAllowed { method: String, action: String },

    #[error("{operation} is not supported for {switch_type} switch {id}")]
    UnsupportedForType {
        operation: &'static str,
        switch_type: String,
        id: usize,
    },

    #[error("Switch not writable: {0}")]
    SwitchNotWritable(usize),

    #[error("Name too long: {len} bytes, must be shorter than {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("Value {value} out of range [{min}, {max}] for switch {id}")]
    ValueOutOfRange {
        id: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("Invalid switch count {count}, must be between 0 and {max}")]
    InvalidSwitchCount { count: String, max: usize },

    #[error("Hardware write failed: {0}")]
    Hardware(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwitchError {
    /// Protocol error kind reported to the client for this error
    pub fn error_code(&self) -> AlpacaErrorCode {
        match self {
            SwitchError::InvalidSwitchId(_)
            | SwitchError::NameTooLong { .. }
            | SwitchError::ValueOutOfRange { .. }
            | SwitchError::InvalidValue(_)
            | SwitchError::InvalidHostname(_)
            | SwitchError::InvalidSwitchCount { .. } => AlpacaErrorCode::InvalidValue,
            SwitchError::MissingArgument(_)
            | SwitchError::UnknownDevice(_)
            | SwitchError::UnknownAction(_)
            | SwitchError::MethodNotAllowed { .. }
            | SwitchError::UnsupportedForType { .. }
            | SwitchError::SwitchNotWritable(_)
            | SwitchError::Hardware(_)
            | SwitchError::Storage(_)
            | SwitchError::Io(_)
            | SwitchError::Json(_) => AlpacaErrorCode::InvalidOperation,
        }
    }
}

/// Result type alias for switch operations
pub type Result<T> = std::result::Result<T, SwitchError>;
