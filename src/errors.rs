use crate::services::error::FsError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// A lightweight wrapper for errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Security violations answer exactly like a missing resource, and store
/// failures never leak backend detail to the caller.
impl From<FsError> for AppError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(_) => AppError::not_found(err.to_string()),
            FsError::AlreadyExists(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            FsError::InvalidOperation(_) | FsError::InvalidPath(_) => {
                AppError::bad_request(err.to_string())
            }
            FsError::SecurityViolation => AppError::not_found("resource not found"),
            FsError::PayloadTooLarge => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            FsError::IncompleteUpload(_) => AppError::bad_request(err.to_string()),
            FsError::StoreUnavailable(source) => {
                error!("object store failure: {}", source);
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage is temporarily unavailable",
                )
            }
        }
    }
}
