//! Error types for the SCN client.
//!
//! Every failure the client reports falls into one of four kinds (see
//! [`ErrorKind`]) so callers can branch on cause without matching on
//! individual variants.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the SCN client.
#[derive(Debug, Error)]
pub enum ScnError {
    // Precondition errors
    #[error("service has not been joined")]
    NotJoined,

    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("RPC call {method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("HTTP error: {message}")]
    Http {
        message: String,
        /// Status code when the server answered with a non-success status
        status: Option<u16>,
    },

    // Remote errors
    #[error("{method} rejected by SCN middleware: {message}")]
    Remote { method: String, message: String },

    // Payload errors
    #[error("Decode error: {message}")]
    Decode { message: String },
}

/// Coarse classification of [`ScnError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A local precondition (the join state) was not met.
    Precondition,
    /// The peer could not be reached, the connection broke, or the call timed out.
    Transport,
    /// The middleware answered with an error.
    Remote,
    /// A payload could not be encoded or decoded.
    Decode,
}

/// Result type alias for SCN operations.
pub type Result<T> = std::result::Result<T, ScnError>;

impl From<std::io::Error> for ScnError {
    fn from(err: std::io::Error) -> Self {
        ScnError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ScnError {
    fn from(err: serde_json::Error) -> Self {
        ScnError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<rmpv::ext::Error> for ScnError {
    fn from(err: rmpv::ext::Error) -> Self {
        ScnError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ScnError {
    fn from(err: reqwest::Error) -> Self {
        ScnError::Http {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

impl ScnError {
    /// Create a transport error without an underlying IO error.
    pub fn transport(message: impl Into<String>) -> Self {
        ScnError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        ScnError::Decode {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScnError::NotJoined => ErrorKind::Precondition,
            ScnError::Transport { .. } | ScnError::Timeout { .. } | ScnError::Http { .. } => {
                ErrorKind::Transport
            }
            ScnError::Remote { .. } => ErrorKind::Remote,
            ScnError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// Returns true for the "service has not been joined" precondition.
    pub fn is_not_joined(&self) -> bool {
        matches!(self, ScnError::NotJoined)
    }
}
