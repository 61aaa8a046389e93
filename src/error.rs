//! Error types for the tus client.

use thiserror::Error;

/// Errors produced by the upload engine, manager, and store backends.
#[derive(Error, Debug)]
pub enum TusError {
    /// The server violated the tus contract: a missing or malformed header,
    /// an unexpected status code, or a disagreement about the upload offset.
    #[error("protocol error: {message}{}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Protocol {
        /// Human-readable description of the violation.
        message: String,
        /// The offending HTTP status, when one was received.
        status: Option<u16>,
    },

    /// A connection, DNS, or timeout failure. Retryable by the engine up to
    /// the configured retry budget.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was invoked while the engine or managed upload was in an
    /// incompatible state (e.g. `resume` with nothing paused).
    #[error("invalid state: {0}")]
    State(String),

    /// `prevent_duplicates` rejected the upload: a store entry existed for
    /// this fingerprint but the server no longer recognizes it.
    #[error("duplicate upload rejected: {0}")]
    Duplicate(String),

    /// A URL could not be parsed or resolved.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A header value was not valid ASCII/UTF-8 or otherwise malformed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A JSON body could not be serialized or parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TusError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            status: None,
        }
    }

    pub(crate) fn protocol_status(message: impl Into<String>, status: u16) -> Self {
        Self::Protocol {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<http::header::InvalidHeaderValue> for TusError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for TusError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

/// A specialized `Result` type for tus client operations.
pub type Result<T> = std::result::Result<T, TusError>;
