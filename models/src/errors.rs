// models/src/errors.rs

use serde::{Deserialize, Serialize};
pub use thiserror::Error;

/// Core error taxonomy. Variants carry a message payload so errors stay
/// serialisable across service boundaries.
#[derive(Debug, Serialize, Deserialize, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Runtime state error: {0}")]
    RuntimeState(String),
    #[error("Conversion error: {0}")]
    Conversion(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Failed to acquire branch lock: {0}")]
    LockContention(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("An internal error occurred: {0}")]
    Internal(String),
}

impl From<&str> for ServiceError {
    fn from(error: &str) -> Self {
        ServiceError::Internal(error.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Conversion(format!("JSON serialisation error: {}", err))
    }
}

impl From<std::num::ParseIntError> for ServiceError {
    fn from(err: std::num::ParseIntError) -> Self {
        ServiceError::Conversion(format!("Invalid numeric identifier: {}", err))
    }
}

/// A type alias for a `Result` that returns a `ServiceError` on failure.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Parse a numeric component identifier.
pub fn parse_sctid(id: &str) -> ServiceResult<i64> {
    id.parse::<i64>()
        .map_err(|_| ServiceError::Conversion(format!("Identifier '{}' is not numeric", id)))
}
