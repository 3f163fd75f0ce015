//! Error types for the Cadenza runtime.
//!
//! Failures raised on the responder side cross the process boundary as
//! [`RemoteError`] values reconstructed from their wire envelope; everything
//! else here is a local failure of the transport or its callers.

use crate::ipc::codec::RemoteError;
use thiserror::Error;

/// Main error type for the Cadenza core runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("connection to responder closed")]
    ConnectionClosed,

    #[error("framing error: {message}")]
    Frame { message: String },

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },

    // Responder-local errors
    #[error("no handler registered for channel {channel:?}")]
    NoHandler { channel: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A failure raised on the responder side, reconstructed from its
    /// wire envelope. Only name, message, stack and data fields survive
    /// the boundary; the original type identity does not.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("operation was cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Cadenza core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<crate::cancel::CancelledError> for CoreError {
    fn from(_: crate::cancel::CancelledError) -> Self {
        CoreError::Cancelled
    }
}

impl CoreError {
    /// The name of the remote error, if this is a reconstructed responder
    /// failure. Convenient for callers matching on domain errors such as
    /// `NotFoundError` or `UniqueViolationError`.
    pub fn remote_name(&self) -> Option<&str> {
        match self {
            CoreError::Remote(remote) => Some(&remote.name),
            _ => None,
        }
    }
}
