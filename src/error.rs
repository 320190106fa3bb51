//! # Error Handling
//!
//! This module defines the application error type and how it's converted to HTTP responses.
//!
//! ## Error taxonomy:
//! - **InvalidRequest**: client input malformed (400)
//! - **PayloadTooLarge**: upload exceeds the configured limit (413)
//! - **ProcessingError**: the diagnostic engine failed (500)
//! - **ArtifactMissing / PublishError**: the report pipeline lost its artifact or URL (500)
//! - **SchemaMismatch**: the engine's output lacks a field the report needs (500)
//! - **ChatUnavailable**: the chat-completion API failed (500)
//!
//! ## Propagation policy:
//! Validation errors short-circuit before any side effect. Collaborator failures are
//! converted into one of these variants at the orchestrator or session boundary, so a
//! handler never sees a raw collaborator error. Cleanup failures never become an
//! `AppError` at all; they are logged where they happen.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::InvalidRequest("No selected file".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Client sent a missing, empty or disallowed input
    InvalidRequest(String),

    /// Upload body exceeds `upload.max_file_size_bytes`
    PayloadTooLarge { limit_bytes: usize },

    /// The diagnostic engine raised; the detail is surfaced to the caller
    ProcessingError(String),

    /// The engine returned but the rendered report is not on disk
    ArtifactMissing,

    /// The artifact store failed or returned no durable URL
    PublishError(String),

    /// Engine output is missing a key path, or holds the wrong JSON type there
    /// (`expected` names the type the report needs)
    SchemaMismatch {
        path: String,
        expected: Option<&'static str>,
    },

    /// The chat-completion API failed
    ChatUnavailable(String),

    /// Server-side problems with no better category
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

/// The Display text is exactly what clients see in the `error` field.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidRequest(msg) => write!(f, "{}", msg),
            AppError::PayloadTooLarge { limit_bytes } => {
                write!(f, "File is too large (limit: {} bytes)", limit_bytes)
            }
            AppError::ProcessingError(msg) => write!(f, "Error processing audio: {}", msg),
            AppError::ArtifactMissing => write!(f, "PDF report not generated"),
            AppError::PublishError(msg) => write!(f, "Failed to upload PDF report: {}", msg),
            AppError::SchemaMismatch { path, expected: None } => write!(
                f,
                "Error processing audio: diagnostic output is missing `{}`",
                path
            ),
            AppError::SchemaMismatch { path, expected: Some(expected) } => write!(
                f,
                "Error processing audio: diagnostic output has an unexpected value at `{}` (expected a {})",
                path, expected
            ),
            AppError::ChatUnavailable(msg) => write!(f, "Assistant unavailable: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable kind placed next to the message in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::ProcessingError(_) => "processing_error",
            AppError::ArtifactMissing => "artifact_missing",
            AppError::PublishError(_) => "publish_error",
            AppError::SchemaMismatch { .. } => "schema_mismatch",
            AppError::ChatUnavailable(_) => "chat_unavailable",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": "File type not allowed",
///   "type": "invalid_request",
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ProcessingError(_)
            | AppError::ArtifactMissing
            | AppError::PublishError(_)
            | AppError::SchemaMismatch { .. }
            | AppError::ChatUnavailable(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "type": self.kind(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they become a 400 rather than a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Filesystem errors while staging an upload are the server's problem, not the client's.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
