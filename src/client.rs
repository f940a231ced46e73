//! Async relay client.
//!
//! [`RelayClient`] owns a [`Dispatcher`] and, once a transport is attached,
//! a background transport loop task. The loop drives the connection state
//! machine from transport activity, forwards queued outbound frames, and
//! hands inbound frames to the dispatcher. Lifecycle transitions are
//! published on a bounded [`ConnectionEvent`] channel and dispatched locally
//! on the `ws` channel.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), ws_relay_client::RelayError> {
//! use ws_relay_client::{ConnectionEvent, RelayClient, RelayConfig};
//!
//! let mut client = RelayClient::new(RelayConfig::default().with_debug(true));
//!
//! // Subscriptions made before the connection opens are registered with the
//! // relay as soon as it does.
//! client.subscribe("game", "update_state", |state| {
//!     println!("state: {state}");
//! })?;
//!
//! let mut events = client.connect().await?;
//! while let Some(event) = events.recv().await {
//!     if event == ConnectionEvent::Close {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::connection::{ConnectionEvent, ConnectionState};
use crate::dispatcher::{Dispatcher, FrameLog};
use crate::error::{RelayError, Result};
use crate::protocol::{default_endpoint, local_endpoint, SubscriptionKey};
use crate::registry::Names;
use crate::transport::Transport;

/// Default capacity of the bounded lifecycle event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 32;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for opening the WebSocket connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RelayClient`].
///
/// # Example
///
/// ```
/// use ws_relay_client::RelayConfig;
///
/// let config = RelayConfig::default();
/// assert_eq!(config.endpoint, "ws://localhost:49322");
/// assert!(!config.debug);
///
/// let config = RelayConfig::default()
///     .with_port(50000)
///     .with_debug(true)
///     .with_debug_filters(["game:update_state"]);
/// assert_eq!(config.endpoint, "ws://localhost:50000");
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket URL of the relay. Defaults to `ws://localhost:49322`.
    pub endpoint: String,
    /// Log every inbound frame at `info` level.
    pub debug: bool,
    /// `"channel:event"` strings excluded from debug logging.
    pub debug_filters: Option<Vec<String>>,
    /// Capacity of the bounded lifecycle event channel.
    ///
    /// When the consumer falls behind, `Open` and `Error` events are dropped
    /// with a warning. `Close` is always delivered. Values below 1 are
    /// clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`RelayClient::shutdown`] waits for the transport loop to
    /// close the transport before aborting it.
    pub shutdown_timeout: Duration,
    /// How long [`RelayClient::connect`] waits for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl RelayConfig {
    /// Configuration for the given endpoint, with defaults for the rest.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            debug: false,
            debug_filters: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the relay endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Point at a relay on `localhost` listening on `port`.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.endpoint = local_endpoint(port);
        self
    }

    /// Enable or disable debug logging of inbound frames.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Exclude these `"channel:event"` strings from debug logging.
    #[must_use]
    pub fn with_debug_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debug_filters = Some(filters.into_iter().map(Into::into).collect());
        self
    }

    /// Set the capacity of the lifecycle event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout. Zero aborts the loop immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the WebSocket connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn frame_log(&self) -> FrameLog {
        FrameLog::new(self.debug, self.debug_filters.clone())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(default_endpoint())
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to one relay connection and its subscriptions.
///
/// Subscribing, clearing and local sends work whether or not a transport is
/// attached. Remote sends need an open connection.
pub struct RelayClient {
    dispatcher: Dispatcher,
    config: RelayConfig,
    /// Handle to the background transport loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the transport loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RelayClient {
    /// Create a disconnected client.
    ///
    /// Warns once if debug logging is enabled.
    pub fn new(config: RelayConfig) -> Self {
        let dispatcher = Dispatcher::with_frame_log(config.frame_log());
        dispatcher.frame_log().announce();
        Self {
            dispatcher,
            config,
            task: None,
            shutdown_tx: None,
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// A shared handle to this client's dispatcher, e.g. for callbacks that
    /// need to send or subscribe.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Attach an already connected transport and start the transport loop.
    ///
    /// The loop immediately performs the open transition: `ws:open` is
    /// dispatched, the state becomes connected and queued registrations are
    /// flushed. Returns the lifecycle event receiver.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyAttached`] if the previous connection
    /// has not closed yet.
    #[must_use = "the event receiver reports connection lifecycle changes"]
    pub fn attach(
        &mut self,
        transport: impl Transport,
    ) -> Result<mpsc::Receiver<ConnectionEvent>> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        self.dispatcher.bind_outbound(outbound_tx)?;

        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = self.config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(transport_loop(
            transport,
            self.dispatcher.clone(),
            outbound_rx,
            event_tx,
            shutdown_rx,
        ));
        self.task = Some(task);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(event_rx)
    }

    /// Open a WebSocket connection to the configured endpoint and attach it.
    ///
    /// If the connection cannot be opened, `ws:error` and then `ws:close`
    /// are dispatched locally, the client stays disconnected and the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] or [`RelayError::Timeout`] if the
    /// connection fails, or [`RelayError::AlreadyAttached`].
    #[cfg(feature = "transport-websocket")]
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<ConnectionEvent>> {
        use crate::transports::WebSocketTransport;

        if self.dispatcher.is_attached() {
            return Err(RelayError::AlreadyAttached);
        }

        let endpoint = self.config.endpoint.clone();
        match WebSocketTransport::connect_with_timeout(&endpoint, self.config.connect_timeout).await
        {
            Ok(transport) => self.attach(transport),
            Err(e) => {
                error!(endpoint = %endpoint, "failed to connect to relay: {e}");
                self.dispatcher
                    .handle_connection_event(ConnectionEvent::Error);
                self.dispatcher
                    .handle_connection_event(ConnectionEvent::Close);
                Err(e)
            }
        }
    }

    /// Close the transport and stop the background task.
    ///
    /// Subscriptions survive; a later [`attach`](Self::attach) starts a new
    /// connection. Use [`dispose`](Self::dispose) to drop them.
    pub async fn shutdown(&mut self) {
        debug!("RelayClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the transport loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        // An aborted loop never ran its close transition.
        if self.dispatcher.is_connected() {
            self.dispatcher
                .handle_connection_event(ConnectionEvent::Close);
        }
    }

    // ── Subscriptions and sends ─────────────────────────────────────

    /// See [`Dispatcher::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EmptyNames`] or [`RelayError::InvalidName`].
    pub fn subscribe<F>(
        &self,
        channels: impl Into<Names>,
        events: impl Into<Names>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(channels, events, callback)
    }

    /// See [`Dispatcher::subscribe_as`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EmptyNames`] or [`RelayError::InvalidName`].
    pub fn subscribe_as<T, F>(
        &self,
        channels: impl Into<Names>,
        events: impl Into<Names>,
        callback: F,
    ) -> Result<()>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_as(channels, events, callback)
    }

    /// See [`Dispatcher::send`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidName`] or [`RelayError::NotConnected`].
    pub fn send(&self, channel: &str, event: &str, data: Value) -> Result<()> {
        self.dispatcher.send(channel, event, data)
    }

    /// See [`Dispatcher::clear_event_callbacks`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidName`].
    pub fn clear_event_callbacks(&self, channel: &str, event: &str) -> Result<usize> {
        self.dispatcher.clear_event_callbacks(channel, event)
    }

    /// See [`Dispatcher::trigger_subscribers`].
    pub fn trigger_subscribers(&self, channel: &str, event: &str, data: &Value) -> usize {
        self.dispatcher.trigger_subscribers(channel, event, data)
    }

    /// Drop every subscription and queued registration.
    pub fn dispose(&self) {
        self.dispatcher.dispose();
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    /// Keys waiting to be registered on the next open.
    pub fn pending_registrations(&self) -> Vec<SubscriptionKey> {
        self.dispatcher.pending_registrations()
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; abort the loop instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop multiplexing outbound frames, inbound frames and the
/// shutdown signal via `tokio::select!`.
///
/// Runs the open transition on entry and the close transition on exit.
/// Exits when:
/// - shutdown is requested (or the client handle is dropped)
/// - the transport returns `None` (relay closed the connection)
/// - a transport send or receive error occurs (after the error transition)
async fn transport_loop(
    mut transport: impl Transport,
    dispatcher: Dispatcher,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("transport loop started");

    transition(&dispatcher, &event_tx, ConnectionEvent::Open).await;

    loop {
        tokio::select! {
            // Branch 1: outgoing frame queued by the dispatcher
            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            error!("transport send error: {e}");
                            transition(&dispatcher, &event_tx, ConnectionEvent::Error).await;
                            break;
                        }
                    }
                    None => {
                        debug!("outbound queue closed, shutting down transport loop");
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                break;
            }

            // Branch 3: incoming frame from the relay
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => dispatcher.handle_frame(&text),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        transition(&dispatcher, &event_tx, ConnectionEvent::Error).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by relay");
                        break;
                    }
                }
            }
        }
    }

    transition(&dispatcher, &event_tx, ConnectionEvent::Close).await;
    debug!("transport loop exited");
}

/// Apply a lifecycle transition and publish it on the event channel.
///
/// `Close` is always the last event and is awaited rather than dropped when
/// the channel is full.
async fn transition(
    dispatcher: &Dispatcher,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    event: ConnectionEvent,
) {
    dispatcher.handle_connection_event(event);

    if event == ConnectionEvent::Close {
        if event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
        return;
    }

    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    // ── Mock transport ──────────────────────────────────────────────

    /// A mock transport that records sent frames and replays scripted ones.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, RelayError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        fail_send: bool,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, RelayError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
                fail_send: false,
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), RelayError> {
            if self.fail_send {
                return Err(RelayError::TransportSend("broken pipe".into()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RelayError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Scripted frames exhausted: stay open until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), RelayError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.endpoint, "ws://localhost:49322");
        assert!(!config.debug);
        assert!(config.debug_filters.is_none());
        assert_eq!(config.event_channel_capacity, 32);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_builders() {
        let config = RelayConfig::new("ws://relay:1")
            .with_debug(true)
            .with_debug_filters(vec!["game:update_state".to_string()])
            .with_event_channel_capacity(0)
            .with_shutdown_timeout(Duration::from_millis(10))
            .with_connect_timeout(Duration::from_millis(20));
        assert_eq!(config.endpoint, "ws://relay:1");
        assert!(config.debug);
        assert_eq!(
            config.debug_filters.as_deref(),
            Some(&["game:update_state".to_string()][..])
        );
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(
            config.with_endpoint("ws://other:2").endpoint,
            "ws://other:2"
        );
    }

    #[test]
    fn new_client_is_disconnected() {
        let client = RelayClient::new(RelayConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn attach_opens_and_flushes_queue() {
        let client_config = RelayConfig::default();
        let mut client = RelayClient::new(client_config);
        client.subscribe("game", "update_state", |_| {}).unwrap();
        assert_eq!(client.pending_registrations().len(), 1);

        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));
        assert!(client.is_connected());
        assert!(client.pending_registrations().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let messages = sent.lock().unwrap();
            assert_eq!(
                messages.as_slice(),
                [r#"{"event":"wsRelay:register","data":"game:update_state"}"#]
            );
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn attach_twice_is_rejected() {
        let mut client = RelayClient::new(RelayConfig::default());
        let (first, _sent, _closed) = MockTransport::new(vec![]);
        let _events = client.attach(first).unwrap();

        let (second, _sent, _closed) = MockTransport::new(vec![]);
        assert!(matches!(
            client.attach(second),
            Err(RelayError::AlreadyAttached)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_close() {
        let mut client = RelayClient::new(RelayConfig::default());
        let (transport, _sent, closed) = MockTransport::new(vec![]);
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));

        client.shutdown().await;
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Close));
        assert_eq!(events.recv().await, None);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn send_error_emits_error_then_close() {
        let mut client = RelayClient::new(RelayConfig::default());
        let (mut transport, _sent, _closed) = MockTransport::new(vec![]);
        transport.fail_send = true;
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));

        client.send("game", "ping", Value::Null).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Error));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Close));
        assert!(!client.is_connected());
        assert!(matches!(
            client.send("game", "ping", Value::Null),
            Err(RelayError::NotConnected)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn reattach_after_close() {
        let mut client = RelayClient::new(RelayConfig::default());
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Close));

        client.subscribe("game", "goal_scored", |_| {}).unwrap();
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn zero_shutdown_timeout_still_marks_disconnected() {
        let mut client = RelayClient::new(
            RelayConfig::default().with_shutdown_timeout(Duration::ZERO),
        );
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let mut events = client.attach(transport).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));

        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn debug_impl_reports_state() {
        let client = RelayClient::new(RelayConfig::default());
        let rendered = format!("{client:?}");
        assert!(rendered.contains("Disconnected"));
        assert!(rendered.contains("ws://localhost:49322"));
    }
}
