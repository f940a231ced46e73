//! Transport abstraction for the relay protocol.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and the relay server. Every frame is one JSON text message, so
//! implementations handle message framing internally (WebSocket frames,
//! length-prefixed TCP, in-process channels).
//!
//! # Connection Setup
//!
//! Connection setup is not part of this trait. Construct a connected
//! transport externally and hand it to `RelayClient::attach`, or let
//! `RelayClient::connect` open the built-in WebSocket transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use ws_relay_client::error::RelayError;
//! use ws_relay_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RelayError> {
//!         // Write one JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RelayError>> {
//!         // Return the next JSON text frame, or None once closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RelayError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RelayError;

/// A bidirectional text message transport to the relay server.
///
/// Each call to [`send`](Transport::send) transmits one complete frame.
/// Each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the transport
/// loop polls it inside `tokio::select!`. Channel-based implementations
/// (e.g. wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransportSend`] if the frame could not be
    /// written.
    async fn send(&mut self, message: String) -> Result<(), RelayError>;

    /// Receive the next text frame from the relay.
    ///
    /// Returns:
    /// - `Some(Ok(text))` for a complete frame
    /// - `Some(Err(e))` for a transport error
    /// - `None` once the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, RelayError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), RelayError>;
}
