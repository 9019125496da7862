use crate::services::{
    archive::ArchiveError,
    file_service::{FileOpError, RenameError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message returned whenever the underlying failure must not leak.
pub const GENERIC_FAILURE: &str = "The operation failed. Please try again.";

/// Error returned by every handler, rendered as
/// `{ "success": false, "message": ..., "type"? }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Machine-readable discriminator for clients that branch on it.
    pub kind: Option<&'static str>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "You need to log in.")
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
        let mut body = json!({
            "success": false,
            "message": self.message,
        });
        if let Some(kind) = self.kind {
            body["type"] = json!(kind);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<FileOpError> for AppError {
    fn from(err: FileOpError) -> Self {
        match err {
            FileOpError::Validation(_)
            | FileOpError::NoFiles
            | FileOpError::HomePageProtected(_)
            | FileOpError::EmptyFile { .. }
            | FileOpError::TooLarge { .. } => AppError::bad_request(err.to_string()),
            FileOpError::AlreadyExists | FileOpError::DestinationExists { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string()).with_kind("FILE_EXISTS")
            }
            FileOpError::NotFound => AppError::not_found(err.to_string()),
            FileOpError::Store(ref source) => {
                tracing::error!(error = %source, "object store operation failed");
                AppError::internal(GENERIC_FAILURE)
            }
            FileOpError::Rename(ref source) => {
                tracing::error!(error = %source, "rename failed");
                let kind = match source {
                    RenameError::Copy(_) => "COPY_FAILED",
                    RenameError::DeleteOriginal { .. } => "DELETE_ORIGINAL_FAILED",
                };
                AppError::internal(GENERIC_FAILURE).with_kind(kind)
            }
            FileOpError::PartialUpload { uploaded, source } => {
                let inner = AppError::from(*source);
                AppError {
                    message: format!(
                        "{} ({} file(s) were uploaded before the failure)",
                        inner.message,
                        uploaded.len()
                    ),
                    kind: Some("PARTIAL_UPLOAD"),
                    ..inner
                }
            }
        }
    }
}

impl From<ArchiveError> for AppError {
    fn from(err: ArchiveError) -> Self {
        tracing::error!(error = %err, "building home archive failed");
        AppError::internal(GENERIC_FAILURE)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database query failed");
        AppError::internal(GENERIC_FAILURE)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "request failed");
        AppError::internal(GENERIC_FAILURE)
    }
}
