//! Response envelope

use serde::Serialize;
use serde_json::Value;

use crate::error::SwitchError;

/// Protocol error kinds reported in `ErrorNumber`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpacaErrorCode {
    InvalidValue,
    InvalidOperation,
}

impl AlpacaErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            AlpacaErrorCode::InvalidValue => 0x401,
            AlpacaErrorCode::InvalidOperation => 0x40B,
        }
    }
}

/// HTTP status of a successful request
pub const STATUS_OK: u16 = 200;

/// HTTP status of a rejected request
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Body of every response, with the HTTP status it is sent with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlpacaResponse {
    #[serde(skip)]
    pub status: u16,
    #[serde(rename = "ClientID")]
    pub client_id: u32,
    #[serde(rename = "ClientTransactionID")]
    pub client_transaction_id: u32,
    #[serde(rename = "ServerTransactionID")]
    pub server_transaction_id: u32,
    #[serde(rename = "ErrorNumber")]
    pub error_number: i32,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
    #[serde(rename = "Value", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Identifiers echoed in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub client_id: u32,
    pub client_transaction_id: u32,
    pub server_transaction_id: u32,
}

impl AlpacaResponse {
    pub fn success(transaction: Transaction, value: Option<Value>) -> Self {
        Self {
            status: STATUS_OK,
            client_id: transaction.client_id,
            client_transaction_id: transaction.client_transaction_id,
            server_transaction_id: transaction.server_transaction_id,
            error_number: 0,
            error_message: String::new(),
            value,
        }
    }

    pub fn failure(transaction: Transaction, error: &SwitchError) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            client_id: transaction.client_id,
            client_transaction_id: transaction.client_transaction_id,
            server_transaction_id: transaction.server_transaction_id,
            error_number: error.error_code().code(),
            error_message: error.to_string(),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_number == 0
    }

    /// Error kind carried by a failed response
    pub fn error_code(&self) -> Option<AlpacaErrorCode> {
        match self.error_number {
            0x401 => Some(AlpacaErrorCode::InvalidValue),
            0x40B => Some(AlpacaErrorCode::InvalidOperation),
            _ => None,
        }
    }
}
