//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Not eligible to claim until {next_claim}")]
    NotEligible { next_claim: DateTime<Utc> },

    #[error("Insufficient faucet balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u128, required: u128 },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Ledger persistence error: {0}")]
    LedgerPersistence(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Balance oracle error: {0}")]
    Oracle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Stable machine-readable classification
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::Validation(_) => "VALIDATION_ERROR",
            FaucetError::UserNotFound(_) => "USER_NOT_FOUND",
            FaucetError::NotEligible { .. } => "NOT_ELIGIBLE",
            FaucetError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            FaucetError::Signing(_) => "SIGNING_ERROR",
            FaucetError::Submission(_) => "SUBMISSION_ERROR",
            FaucetError::LedgerPersistence(_) => "LEDGER_PERSISTENCE_ERROR",
            FaucetError::Lock(_) => "LOCK_ERROR",
            FaucetError::Oracle(_) => "BALANCE_ORACLE_ERROR",
            FaucetError::Config(_) => "CONFIG_ERROR",
            FaucetError::Database(_) => "DATABASE_ERROR",
            FaucetError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<bincode::Error> for FaucetError {
    fn from(err: bincode::Error) -> Self {
        FaucetError::Internal(format!("Serialization failed: {}", err))
    }
}

impl From<drip_crypto::TransferError> for FaucetError {
    fn from(err: drip_crypto::TransferError) -> Self {
        FaucetError::Signing(err.to_string())
    }
}

impl From<drip_crypto::EcdsaError> for FaucetError {
    fn from(err: drip_crypto::EcdsaError) -> Self {
        FaucetError::Signing(err.to_string())
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        // Stage detail stays in the logs; callers get a classification.
        let (status, error_message) = match &self {
            FaucetError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FaucetError::UserNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("User {} not found", id))
            }
            FaucetError::NotEligible { next_claim } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Next claim available at {}", next_claim.to_rfc3339()),
            ),
            FaucetError::InsufficientBalance { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Faucet is out of funds. Please try again later.".to_string(),
            ),
            FaucetError::Submission(_) | FaucetError::Oracle(_) => (
                StatusCode::BAD_GATEWAY,
                "The ledger authority is unavailable. Please try again later.".to_string(),
            ),
            FaucetError::Lock(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Faucet is busy. Please try again shortly.".to_string(),
            ),
            FaucetError::LedgerPersistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Transfer was submitted but could not be recorded. An operator has been notified."
                    .to_string(),
            ),
            FaucetError::Signing(_)
            | FaucetError::Config(_)
            | FaucetError::Database(_)
            | FaucetError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": error_message,
            "timestamp": Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
