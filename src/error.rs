use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::manager::keys::Permission;

/// Authentication failure modes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid API key")]
    InvalidKey,
    #[error("insufficient permission: {0} required")]
    InsufficientPermission(Permission),
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed query or payload shape
    #[error("validation error: {0}")]
    Validation(String),
    /// Authentication/authorization failure
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Unknown subsystem or key
    #[error("not found: {0}")]
    NotFound(String),
    /// Flush/rotation/cleanup/compression failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Upstream compute or push-protocol operation timed out
    #[error("timeout: {0}")]
    Timeout(String),
    /// Connection cap or oversized download
    #[error("capacity exceeded: {0}")]
    Capacity(String),
    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::InvalidKey) => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::InsufficientPermission(_)) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Capacity(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation_error",
        AppError::Auth(AuthError::InvalidKey) => "invalid_key",
        AppError::Auth(AuthError::InsufficientPermission(_)) => "insufficient_permission",
        AppError::NotFound(_) => "not_found",
        AppError::Io(_) => "io_error",
        AppError::Timeout(_) => "timeout",
        AppError::Capacity(_) => "capacity_exceeded",
        AppError::Internal(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}
