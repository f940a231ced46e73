//! # ws-relay-client
//!
//! Client-side event relay. Keeps one WebSocket connection to a local relay
//! server, lets application code subscribe callbacks to `(channel, event)`
//! pairs, and fans each incoming payload out to every interested callback in
//! registration order.
//!
//! ## Features
//!
//! - **Ordered fan-out**: callbacks under one key run in registration order
//! - **Deferred registration**: subscriptions made before the connection
//!   opens are registered with the relay, in order, when it does
//! - **Local events**: the `local` channel dispatches in-process without
//!   touching the transport; connection lifecycle arrives on `ws`
//! - **Transport-agnostic**: implement [`Transport`] for any backend; the
//!   default `transport-websocket` feature provides `WebSocketTransport`
//!
//! ## Wire format
//!
//! Text frames carrying `{"event": "<channel>:<event>", "data": <any>}`.
//! Channel and event names must not contain `:`.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod transports;

#[cfg(feature = "tokio-runtime")]
pub mod client;

// Re-export primary types for ergonomic imports.
#[cfg(feature = "tokio-runtime")]
pub use client::{RelayClient, RelayConfig};
pub use connection::{ConnectionEvent, ConnectionState};
pub use dispatcher::{Dispatcher, FrameLog};
pub use error::{RelayError, Result};
pub use protocol::{Frame, SubscriptionKey};
pub use registry::{Callback, Names};
pub use transport::Transport;
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
