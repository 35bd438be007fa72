//! Error types for wirelink.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all wirelink operations.
///
/// The error is `Clone` because a single connection failure is delivered to
/// several parties: the `failed` event and every pending response callback.
#[derive(Debug, Clone, Error)]
pub enum WirelinkError {
    /// Resolving a discovery record to an address failed.
    #[error("Failed to resolve service: {0}")]
    Resolution(String),

    /// Establishing the transport link failed.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Read or write failure on an established connection.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Framing violation (truncated or oversized header).
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Operation attempted outside the `Connected` state.
    #[error("Connection is not connected")]
    NotConnected,

    /// Tag collides with the auto-allocated range or the reserved value.
    #[error("Tag {0} is reserved")]
    ReservedTag(u32),

    /// Pending response invalidated by `cancel()` or peer disconnect.
    #[error("Cancelled")]
    Cancelled,

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    Encode(String),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    Decode(String),

    /// A response did not arrive in time.
    #[error("Timed out waiting for response")]
    Timeout,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The reactor task has stopped.
    #[error("Reactor has shut down")]
    ReactorClosed,
}

impl WirelinkError {
    /// Whether this error ends the connection it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WirelinkError::Resolution(_)
                | WirelinkError::Connect(_)
                | WirelinkError::Io(_)
                | WirelinkError::MalformedHeader(_)
        )
    }
}

impl From<std::io::Error> for WirelinkError {
    fn from(error: std::io::Error) -> Self {
        WirelinkError::Io(Arc::new(error))
    }
}

impl From<rmp_serde::encode::Error> for WirelinkError {
    fn from(error: rmp_serde::encode::Error) -> Self {
        WirelinkError::Encode(error.to_string())
    }
}

impl From<rmp_serde::decode::Error> for WirelinkError {
    fn from(error: rmp_serde::decode::Error) -> Self {
        WirelinkError::Decode(error.to_string())
    }
}

impl From<serde_json::Error> for WirelinkError {
    fn from(error: serde_json::Error) -> Self {
        WirelinkError::Config(error.to_string())
    }
}

/// Result type alias using WirelinkError.
pub type Result<T> = std::result::Result<T, WirelinkError>;
