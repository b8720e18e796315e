use crate::{services::asset_service::AssetError, storage::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error. Messages are safe to show to clients; causes stay in
/// the logs.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, kind and message.
    pub fn new(status: StatusCode, kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
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
            "kind": self.kind,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<AssetError> for AppError {
    fn from(err: AssetError) -> Self {
        let status = match &err {
            AssetError::Validation(_) => StatusCode::BAD_REQUEST,
            AssetError::NotFound(_) => StatusCode::NOT_FOUND,
            AssetError::Conflict(_) => StatusCode::CONFLICT,
            AssetError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AssetError::Orchestration(_) => StatusCode::BAD_GATEWAY,
            AssetError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &err {
            AssetError::Storage(cause) => tracing::error!(error = %cause, "storage failure"),
            AssetError::Orchestration(cause) => {
                tracing::error!(error = %cause, "transcription service failure")
            }
            AssetError::Database(cause) => tracing::error!(error = %cause, "database failure"),
            _ => {}
        }
        // Display of the opaque variants is a fixed generic message.
        AppError::new(status, err.kind(), err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AssetError::from(err).into()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unhandled error");
        AppError::internal("internal error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_hide_details() {
        let err: AppError =
            AssetError::Storage(StorageError::Unavailable("AccountKey=secret".into())).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.kind, "storage_unavailable");
        assert!(!err.message.contains("secret"));
    }

    #[test]
    fn conflict_maps_to_409() {
        let err: AppError = AssetError::Conflict("video is already completed".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "video is already completed");
    }
}
