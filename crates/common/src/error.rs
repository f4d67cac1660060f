//! Common error types for Rendezvous components.

use thiserror::Error;

/// Errors raised while decoding or encoding signaling frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any known message shape
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame was valid but carried an empty or oversized field
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// Encoding a server event failed
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

/// Result type alias using `ProtocolError`
pub type Result<T> = std::result::Result<T, ProtocolError>;
