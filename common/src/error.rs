use thiserror::Error;
use tokio::task::JoinError;

/// Internal error kinds, one per §7 of the specification. The HTTP layer
/// maps each variant to a status code; nothing downstream of a handler
/// should need to inspect the message text to decide behavior.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    StoreError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<duckdb::Error> for AppError {
    fn from(err: duckdb::Error) -> Self {
        AppError::StoreError(err.to_string())
    }
}

impl From<object_store::Error> for AppError {
    fn from(err: object_store::Error) -> Self {
        AppError::StoreError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<JoinError> for AppError {
    fn from(err: JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Internal(err.to_string())
    }
}
