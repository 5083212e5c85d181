use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ThrottlerError {
    /// The event store could not be read or written.
    #[error("Storage failure: {0}")]
    Storage(String),
    /// Invalid tier, route or settings configuration. Only raised at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::Storage(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::Configuration(err.to_string())
    }
}

/// JSON error body: a human-readable message plus a machine-readable code.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(message: &str, code: &str) -> Self {
        Self {
            message: message.to_string(),
            code: code.to_string(),
        }
    }

    pub fn from_throttler_error(err: &ThrottlerError) -> (StatusCode, Self) {
        match err {
            ThrottlerError::Storage(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Self::new(msg, "throttle.storageUnavailable"),
            ),
            ThrottlerError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::new(msg, "throttle.configuration"),
            ),
            ThrottlerError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Self::new(msg, "throttle.invalidRequest"),
            ),
            ThrottlerError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::new(msg, "throttle.internal"),
            ),
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let (status, body) = ErrorResponse::from_throttler_error(&self);
        (status, Json(body)).into_response()
    }
}
