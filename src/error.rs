//! Error types for the relay client.

use thiserror::Error;

/// Errors that can occur when using the relay client.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remote send was attempted while the connection is not open.
    #[error("not connected to relay")]
    NotConnected,

    /// A channel or event name was rejected.
    ///
    /// Names must be non-empty and must not contain the `:` separator.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        /// Which part of the key was rejected (`"channel"` or `"event"`).
        kind: &'static str,
        /// The offending name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },

    /// `subscribe` was called with an empty channel or event collection.
    #[error("subscribe requires at least one {0}")]
    EmptyNames(&'static str),

    /// A transport is already attached to this client.
    #[error("a transport is already attached")]
    AlreadyAttached,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for relay client operations.
pub type Result<T> = std::result::Result<T, RelayError>;
