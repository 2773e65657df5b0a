//! Error types for voxrelay.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Every failure a relay session or the surrounding process can report.
///
/// The type is `Clone` because an upload failure is recorded in the pipe
/// (for the transport) and returned by the pump at the same time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("OPENAI_API_KEY environment variable is required")]
    MissingApiKey,

    // Client input errors
    #[error("multipart request must include a 'file' field")]
    MissingFile,

    #[error("Malformed upload: {message}")]
    MalformedUpload { message: String },

    #[error("Invalid request payload: {message}")]
    InvalidRequest { message: String },

    // Upload leg
    #[error("failed to read audio source: {message}")]
    UploadSource { message: String },

    #[error("upload aborted: {message}")]
    UploadAborted { message: String },

    // Download leg
    #[error("request error: {message}")]
    UpstreamRequest { message: String },

    #[error("unexpected status code: {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("error reading stream: {message}")]
    UpstreamRead { message: String },

    // Session lifecycle
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // Process errors
    #[error("Server error: {message}")]
    Server { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// True for errors caused by the caller's request rather than the relay.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::MissingFile
                | RelayError::MalformedUpload { .. }
                | RelayError::InvalidRequest { .. }
        )
    }

    /// True for the two context errors: cancellation and deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RelayError::Cancelled | RelayError::DeadlineExceeded)
    }

    /// HTTP status used when this error is reported before streaming starts.
    /// A deadline can only hit that early while the upload is still arriving.
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(self, RelayError::DeadlineExceeded) {
            StatusCode::REQUEST_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io {
            message: e.to_string(),
        }
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(e: toml::de::Error) -> Self {
        RelayError::ConfigParse {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RelayError>;
