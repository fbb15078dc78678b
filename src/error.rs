use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

use crate::types::Amount;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid Amount: must be greater than zero")]
    InvalidAmount, // CUS-0x20
    #[error("Unauthorized")]
    Unauthorized, // CUS-0x40
    #[error("Insufficient Allowance: required {required}, granted {granted}")]
    InsufficientAllowance { required: Amount, granted: Amount }, // CUS-0x11
    #[error("Insufficient Balance: payer holds less than {required}")]
    InsufficientBalance { required: Amount }, // CUS-0x12
    #[error("Insufficient Funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount }, // CUS-0x13
    #[error("Gateway Failure: {0}")]
    GatewayFailure(String), // CUS-0x50
    #[error("Consistency Violation: {0}")]
    ConsistencyViolation(String), // CUS-0x99
    #[error("Arithmetic Overflow")]
    Overflow, // CUS-0x21
    #[error("Validation Error: {0}")]
    Validation(String), // CUS-0x22
    #[error("Ledger IO Error: {0}")]
    LedgerIo(String), // CUS-0x30
    #[error("Serialization Error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "CUS-0x20",
            LedgerError::Overflow => "CUS-0x21",
            LedgerError::Validation(_) => "CUS-0x22",
            LedgerError::Unauthorized => "CUS-0x40",
            LedgerError::InsufficientAllowance { .. } => "CUS-0x11",
            LedgerError::InsufficientBalance { .. } => "CUS-0x12",
            LedgerError::InsufficientFunds { .. } => "CUS-0x13",
            LedgerError::GatewayFailure(_) => "CUS-0x50",
            LedgerError::LedgerIo(_) => "CUS-0x30",
            LedgerError::Serde(_) => "CUS-0x31",
            LedgerError::ConsistencyViolation(_) => "CUS-0x99",
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match self {
            LedgerError::InvalidAmount | LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
            LedgerError::InsufficientAllowance { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::Overflow => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::GatewayFailure(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));
        (status, body).into_response()
    }
}
