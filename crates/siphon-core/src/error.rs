//! Error types for the Siphon pipeline

use http::StatusCode;
use std::fmt;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Optional response-sink capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Raw connection takeover
    Hijack,
    /// Client disconnect notification
    CloseNotify,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Hijack => f.write_str("hijack"),
            Capability::CloseNotify => f.write_str("close notification"),
        }
    }
}

/// Main error type for the Siphon pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP error raised by a pipeline stage, rendered with its own status
    #[error("{message}")]
    Status {
        /// Status code sent to the client
        status: StatusCode,
        /// Client-facing message
        message: String,
    },

    /// Invalid HTTP request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Upstream connection error
    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnection(String),

    /// Upstream timeout
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The active response writer does not offer the requested capability
    #[error("Response writer does not support {0}")]
    Unsupported(Capability),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Pipeline error carrying `status` and its canonical reason as message
    pub fn status(status: StatusCode) -> Self {
        Error::Status {
            status,
            message: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
        }
    }

    /// Pipeline error carrying `status` and a custom message
    pub fn status_with_message(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Status {
            status,
            message: message.into(),
        }
    }

    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Error::Status { status, .. } => *status,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamConnection(_) => StatusCode::BAD_GATEWAY,
            Error::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client when this error is rendered.
    ///
    /// Only [`Error::Status`] exposes its own text; everything else collapses
    /// to the canonical reason of its status code.
    pub fn public_message(&self) -> String {
        match self {
            Error::Status { message, .. } => message.clone(),
            other => other
                .to_status_code()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
        }
    }
}
