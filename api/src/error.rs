//! Maps [`common::error::AppError`]'s kinds (§7) onto HTTP status codes.
//! Grounded on the teacher's `api-router/src/error.rs` `ApiError` shape,
//! with the kind set swapped for this spec's own.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::BadInput(msg) => Self::BadInput(msg),
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::ParseError(msg) => Self::BadInput(msg),
            AppError::CapabilityUnavailable(msg) => Self::CapabilityUnavailable(msg),
            AppError::StoreError(msg) => {
                tracing::error!(error = %msg, "store error");
                Self::Internal("internal error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                Self::Internal("internal error".to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::CapabilityUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = AppError::NotFound("dataset".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        let err: ApiError = AppError::Conflict("already running".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn capability_unavailable_maps_to_503() {
        let err: ApiError = AppError::CapabilityUnavailable("embedding model".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn store_error_message_is_sanitised() {
        let err: ApiError = AppError::StoreError("duckdb: secret path".to_string()).into();
        match err {
            ApiError::Internal(msg) => assert_eq!(msg, "internal error"),
            _ => panic!("expected Internal"),
        }
    }
}
