use crate::services::{
    bundle_index::IndexError,
    log_service::UploadError,
    storage_service::{StageError, StorageError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const GENERIC_MESSAGE: &str = "something went wrong";

/// A lightweight wrapper for general errors that keeps the message local.
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

    /// Shortcut for a 500 Internal Server Error. The cause is logged, never
    /// sent to the client.
    pub fn internal(cause: impl fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_MESSAGE)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 413 Payload Too Large
    pub fn too_large(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, msg)
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

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(id) => AppError::not_found(format!("log bundle `{}` not found", id)),
            other => AppError::internal(other),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(id) => AppError::not_found(format!("log file `{}` not found", id)),
            other => AppError::internal(other),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Stage(StageError::FileTooLarge { limit, actual }) => AppError::too_large(format!(
                "`{}` bytes is over the single file limit of `{}` bytes",
                actual, limit
            )),
            err @ UploadError::TooManyFiles { .. } => AppError::too_large(err.to_string()),
            err @ UploadError::EmptyUpload => AppError::new(StatusCode::BAD_REQUEST, err.to_string()),
            UploadError::Multipart(msg) => {
                tracing::warn!(error = %msg, "rejected malformed multipart body");
                AppError::new(StatusCode::BAD_REQUEST, "invalid multipart form")
            }
            UploadError::Index(err) => err.into(),
            other => AppError::internal(other),
        }
    }
}
