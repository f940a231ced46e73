//! Subscription dispatch: ordered fan-out, local vs. remote routing, and
//! inbound frame decoding.
//!
//! A [`Dispatcher`] owns the [`SubscriptionRegistry`] and the
//! [`ConnectionManager`] behind one mutex, so every mutation of registry,
//! connection state and pending queue happens in a single exclusive
//! section. Callbacks are always invoked after that lock is released; a
//! callback may subscribe, clear or send through a captured clone of the
//! dispatcher.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use ws_relay_client::Dispatcher;
//!
//! let dispatcher = Dispatcher::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! dispatcher
//!     .subscribe("local", "ping", move |data| sink.lock().unwrap().push(data.clone()))
//!     .unwrap();
//!
//! dispatcher.send("local", "ping", serde_json::json!({"x": 1})).unwrap();
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, Registration};
use crate::error::{RelayError, Result};
use crate::protocol::{
    decode_frame, is_in_process_channel, validate_name, Frame, SubscriptionKey,
    LIFECYCLE_CHANNEL,
};
use crate::registry::{cross_product, Callback, Names, SubscriptionRegistry};

// ── Frame logging ───────────────────────────────────────────────────

/// Debug logging of inbound frames.
///
/// When enabled, every recognized inbound frame is logged at `info` level
/// unless its `"channel:event"` string is in the filter list. Logging never
/// affects dispatch.
#[derive(Debug, Clone, Default)]
pub struct FrameLog {
    enabled: bool,
    filters: Option<Vec<String>>,
}

impl FrameLog {
    /// Logging disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from the debug flag and optional filter list.
    pub fn new(enabled: bool, filters: Option<Vec<String>>) -> Self {
        Self { enabled, filters }
    }

    /// Returns `true` if frames addressed to `key` would be logged.
    pub fn should_log(&self, key: &SubscriptionKey) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.filters {
            Some(filters) => {
                let composite = key.to_string();
                !filters.iter().any(|f| *f == composite)
            }
            None => true,
        }
    }

    fn record(&self, key: &SubscriptionKey, raw: &str) {
        if self.should_log(key) {
            info!(
                channel = key.channel(),
                event = key.event(),
                frame = raw,
                "relay frame"
            );
        }
    }

    /// Warn once that debug mode is on, as the client does at construction.
    #[cfg_attr(not(feature = "tokio-runtime"), allow(dead_code))]
    pub(crate) fn announce(&self) {
        if !self.enabled {
            return;
        }
        if self.filters.is_some() {
            warn!("relay debug mode enabled with filtering; only events not in the filter list will be logged");
        } else {
            warn!("relay debug mode enabled without filters; all inbound events will be logged");
            warn!("to filter, pass 'channel:event' strings to RelayConfig::with_debug_filters");
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State guarded by the dispatcher's single lock.
#[derive(Debug, Default)]
struct DispatchState {
    registry: SubscriptionRegistry,
    connection: ConnectionManager,
    /// Outbound frame queue of the attached transport loop.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl DispatchState {
    /// Queue an encoded frame for the transport.
    fn push_outbound(&self, frame: &Frame) -> Result<()> {
        let text = frame.encode()?;
        let tx = self.outbound.as_ref().ok_or(RelayError::NotConnected)?;
        tx.send(text).map_err(|_| RelayError::NotConnected)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Cloneable handle to one registry + connection manager pair.
///
/// Clones share state. Independent dispatchers share nothing.
#[derive(Clone, Default)]
pub struct Dispatcher {
    state: Arc<Mutex<DispatchState>>,
    frame_log: Arc<FrameLog>,
}

impl Dispatcher {
    /// A dispatcher with no subscriptions, disconnected, frame logging off.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that logs inbound frames according to `frame_log`.
    pub fn with_frame_log(frame_log: FrameLog) -> Self {
        Self {
            state: Arc::default(),
            frame_log: Arc::new(frame_log),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        // A panicking callback never runs under this lock, so a poisoned
        // guard still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Register `callback` under every `(channel, event)` pair of
    /// `channels × events`.
    ///
    /// Keys seen for the first time are registered with the relay: at once
    /// when connected, otherwise on the next open. Keys on the in-process
    /// `local` and `ws` channels are never registered remotely, even though
    /// the relay would accept a register frame for them.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EmptyNames`] or [`RelayError::InvalidName`]
    /// without registering anything.
    pub fn subscribe<F>(
        &self,
        channels: impl Into<Names>,
        events: impl Into<Names>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_callback(channels, events, Arc::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), but takes an already shared
    /// callback. Registering the same callback twice makes it run twice.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn subscribe_callback(
        &self,
        channels: impl Into<Names>,
        events: impl Into<Names>,
        callback: Callback,
    ) -> Result<()> {
        let keys = cross_product(&channels.into(), &events.into()).inspect_err(|e| {
            error!("subscribe rejected: {e}");
        })?;

        let mut state = self.lock();
        for key in keys {
            if !state.registry.insert(&key, Arc::clone(&callback)) || key.is_in_process() {
                continue;
            }
            match state.connection.request_registration(key) {
                Registration::SendNow(key) => {
                    debug!(key = %key, "registering with relay");
                    if let Err(e) = state.push_outbound(&Frame::register(&key)) {
                        warn!(key = %key, "failed to queue registration: {e}");
                    }
                }
                Registration::Queued => {
                    trace!("registration queued until connection opens");
                }
            }
        }
        Ok(())
    }

    /// Subscribe with a typed payload.
    ///
    /// The payload is deserialized into `T` before `callback` runs. Payloads
    /// that do not fit `T` are skipped for this callback.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
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
        self.subscribe(channels, events, move |data: &Value| {
            match serde_json::from_value::<T>(data.clone()) {
                Ok(payload) => callback(payload),
                Err(e) => debug!("payload does not match subscriber type, skipping: {e}"),
            }
        })
    }

    /// Remove every callback for `(channel, event)`.
    ///
    /// Other events on the same channel keep their callbacks. Returns the
    /// number of callbacks removed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidName`] for a malformed name.
    pub fn clear_event_callbacks(&self, channel: &str, event: &str) -> Result<usize> {
        let key = SubscriptionKey::new(channel, event)?;
        let removed = self.lock().registry.clear(&key);
        debug!(key = %key, removed, "cleared event callbacks");
        Ok(removed)
    }

    /// Drop every subscription and queued registration.
    pub fn dispose(&self) {
        let mut state = self.lock();
        state.registry.clear_all();
        state.connection.clear_pending();
        debug!("dispatcher disposed");
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Invoke every callback registered under `(channel, event)` with
    /// `data`, in registration order.
    ///
    /// Unknown keys are a no-op. Returns the number of callbacks invoked.
    pub fn trigger_subscribers(&self, channel: &str, event: &str, data: &Value) -> usize {
        let callbacks = self.lock().registry.snapshot(channel, event);
        for callback in &callbacks {
            callback(data);
        }
        callbacks.len()
    }

    /// Send an event.
    ///
    /// On the `local` (or `ws`) channel the payload is dispatched to local
    /// subscribers immediately and nothing touches the transport. Any other
    /// channel is encoded as one text frame and queued for the transport,
    /// fire-and-forget.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidName`] if a name is empty or contains `:`;
    ///   the error is also logged and nothing is sent.
    /// - [`RelayError::NotConnected`] for a remote send while disconnected.
    pub fn send(&self, channel: &str, event: &str, data: Value) -> Result<()> {
        validate_name("channel", channel)
            .and_then(|()| validate_name("event", event))
            .inspect_err(|e| error!("send rejected: {e}"))?;

        if is_in_process_channel(channel) {
            self.trigger_subscribers(channel, event, &data);
            return Ok(());
        }

        let key = SubscriptionKey::new(channel, event)?;
        let frame = Frame::new(&key, data);
        let state = self.lock();
        if !state.connection.is_connected() {
            warn!(key = %key, "dropping send while disconnected");
            return Err(RelayError::NotConnected);
        }
        state.push_outbound(&frame)
    }

    /// Decode an inbound text frame and dispatch it.
    ///
    /// Frames outside the protocol are dropped without a diagnostic.
    pub fn handle_frame(&self, raw: &str) {
        let Some((key, data)) = decode_frame(raw) else {
            trace!("ignoring unrecognized frame");
            return;
        };
        self.frame_log.record(&key, raw);
        self.trigger_subscribers(key.channel(), key.event(), &data);
    }

    /// Apply a lifecycle event: dispatch it on the `ws` channel, update the
    /// connection state and, on open, flush queued registrations.
    ///
    /// Every open starts a fresh relay session, so keys registered on an
    /// earlier connection are registered again after the queued ones.
    pub fn handle_connection_event(&self, event: ConnectionEvent) {
        self.trigger_subscribers(LIFECYCLE_CHANNEL, event.name(), &Value::Null);

        let mut state = self.lock();
        let opening = event == ConnectionEvent::Open && !state.connection.is_connected();
        let mut drained = state.connection.apply(event);
        if opening {
            for key in state.registry.keys() {
                if !key.is_in_process() && !drained.contains(&key) {
                    drained.push(key);
                }
            }
        }
        for key in &drained {
            debug!(key = %key, "flushing queued registration");
            if let Err(e) = state.push_outbound(&Frame::register(key)) {
                warn!(key = %key, "failed to queue registration: {e}");
            }
        }
        if event == ConnectionEvent::Close {
            state.outbound = None;
        }
    }

    // ── Transport binding ───────────────────────────────────────────

    /// Bind the outbound queue of a new transport loop.
    #[cfg_attr(not(feature = "tokio-runtime"), allow(dead_code))]
    pub(crate) fn bind_outbound(&self, tx: mpsc::UnboundedSender<String>) -> Result<()> {
        let mut state = self.lock();
        if state.outbound.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(RelayError::AlreadyAttached);
        }
        state.outbound = Some(tx);
        Ok(())
    }

    /// Returns `true` while a transport loop is bound and has not closed.
    #[cfg_attr(not(feature = "transport-websocket"), allow(dead_code))]
    pub(crate) fn is_attached(&self) -> bool {
        self.lock()
            .outbound
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock().connection.state()
    }

    /// Returns `true` when connected.
    pub fn is_connected(&self) -> bool {
        self.lock().connection.is_connected()
    }

    /// Keys waiting to be registered on the next open.
    pub fn pending_registrations(&self) -> Vec<SubscriptionKey> {
        self.lock().connection.pending().to_vec()
    }

    /// Returns `true` if `key` has callbacks registered.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.lock().registry.contains(key)
    }

    /// Number of callbacks under `key`.
    pub fn callback_count(&self, key: &SubscriptionKey) -> usize {
        self.lock().registry.callback_count(key)
    }

    /// Every subscribed key, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.lock().registry.keys()
    }

    /// The frame logging settings.
    pub fn frame_log(&self) -> &FrameLog {
        &self.frame_log
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Dispatcher")
            .field("state", &state.connection.state())
            .field("pending", &state.connection.pending().len())
            .field("registry", &state.registry)
            .finish()
    }
}

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
    use serde_json::json;

    fn key(channel: &str, event: &str) -> SubscriptionKey {
        SubscriptionKey::new(channel, event).unwrap()
    }

    /// A dispatcher with an outbound queue the test can read.
    fn bound() -> (Dispatcher, mpsc::UnboundedReceiver<String>) {
        let dispatcher = Dispatcher::new();
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.bind_outbound(tx).unwrap();
        (dispatcher, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        for tag in ["cb1", "cb2"] {
            let seen = Arc::clone(&seen);
            dispatcher
                .subscribe("game", "update_state", move |data| {
                    seen.lock().unwrap().push(format!("{tag}:{data}"));
                })
                .unwrap();
        }

        let invoked = dispatcher.trigger_subscribers("game", "update_state", &json!({"a": 1}));
        assert_eq!(invoked, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![r#"cb1:{"a":1}"#, r#"cb2:{"a":1}"#]
        );
    }

    #[test]
    fn same_callback_twice_runs_twice() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        let callback: Callback = Arc::new(move |_| sink.lock().unwrap().push("hit".into()));
        dispatcher
            .subscribe_callback("game", "goal_scored", Arc::clone(&callback))
            .unwrap();
        dispatcher
            .subscribe_callback("game", "goal_scored", callback)
            .unwrap();

        dispatcher.trigger_subscribers("game", "goal_scored", &Value::Null);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn trigger_unknown_key_is_noop() {
        let dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.trigger_subscribers("game", "update_state", &json!({})),
            0
        );
        assert!(dispatcher.keys().is_empty());
        assert!(dispatcher.pending_registrations().is_empty());
    }

    #[test]
    fn subscribe_while_disconnected_queues_registration() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .subscribe(["a", "b"], ["x", "y"], |_| {})
            .unwrap();
        assert_eq!(
            dispatcher.pending_registrations(),
            vec![key("a", "x"), key("a", "y"), key("b", "x"), key("b", "y")]
        );
    }

    #[test]
    fn open_flushes_queue_once_in_order() {
        let (dispatcher, mut rx) = bound();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.subscribe("game", "goal_scored", |_| {}).unwrap();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        assert!(drain(&mut rx).is_empty());

        dispatcher.handle_connection_event(ConnectionEvent::Open);
        assert_eq!(
            drain(&mut rx),
            vec![
                json!({"event": "wsRelay:register", "data": "game:update_state"}),
                json!({"event": "wsRelay:register", "data": "game:goal_scored"}),
            ]
        );
        assert!(dispatcher.pending_registrations().is_empty());
        assert!(dispatcher.is_connected());
    }

    #[test]
    fn subscribe_while_connected_registers_immediately_once() {
        let (dispatcher, mut rx) = bound();
        dispatcher.handle_connection_event(ConnectionEvent::Open);

        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![json!({"event": "wsRelay:register", "data": "game:update_state"})]
        );
    }

    #[test]
    fn in_process_channels_are_never_registered() {
        let (dispatcher, mut rx) = bound();
        dispatcher.subscribe("local", "foo", |_| {}).unwrap();
        dispatcher.subscribe("ws", ["open", "close"], |_| {}).unwrap();
        assert!(dispatcher.pending_registrations().is_empty());

        dispatcher.handle_connection_event(ConnectionEvent::Open);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn local_send_dispatches_without_transport() {
        let (dispatcher, mut rx) = bound();
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("local", "foo", move |data| {
                sink.lock().unwrap().push(data.to_string());
            })
            .unwrap();

        dispatcher.send("local", "foo", json!({"x": 1})).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![r#"{"x":1}"#]);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn local_send_works_while_disconnected() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("local", "foo", move |_| sink.lock().unwrap().push("hit".into()))
            .unwrap();
        dispatcher.send("local", "foo", Value::Null).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn remote_send_encodes_frame() {
        let (dispatcher, mut rx) = bound();
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        dispatcher
            .send("game", "goal_scored", json!({"a": 1}))
            .unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![json!({"event": "game:goal_scored", "data": {"a": 1}})]
        );
    }

    #[test]
    fn remote_send_while_disconnected_fails() {
        let (dispatcher, mut rx) = bound();
        let err = dispatcher.send("game", "goal_scored", json!({})).unwrap_err();
        assert!(matches!(err, RelayError::NotConnected));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn invalid_names_are_rejected_without_writing() {
        let (dispatcher, mut rx) = bound();
        dispatcher.handle_connection_event(ConnectionEvent::Open);

        let err = dispatcher.send("ga:me", "foo", json!({})).unwrap_err();
        assert!(matches!(err, RelayError::InvalidName { kind: "channel", .. }));
        let err = dispatcher.send("game", "", json!({})).unwrap_err();
        assert!(matches!(err, RelayError::InvalidName { kind: "event", .. }));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn clear_keeps_sibling_events() {
        let dispatcher = Dispatcher::new();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.subscribe("game", "goal_scored", |_| {}).unwrap();

        assert_eq!(
            dispatcher
                .clear_event_callbacks("game", "update_state")
                .unwrap(),
            2
        );
        assert_eq!(
            dispatcher.trigger_subscribers("game", "update_state", &Value::Null),
            0
        );
        assert_eq!(
            dispatcher.trigger_subscribers("game", "goal_scored", &Value::Null),
            1
        );
    }

    #[test]
    fn resubscribe_after_clear_registers_again() {
        let (dispatcher, mut rx) = bound();
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher
            .clear_event_callbacks("game", "update_state")
            .unwrap();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn handle_frame_routes_payload() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("game", "goal_scored", move |data| {
                sink.lock().unwrap().push(data.to_string());
            })
            .unwrap();

        dispatcher.handle_frame(r#"{"event":"game:goal_scored","data":{"a":1}}"#);
        dispatcher.handle_frame(r#"{"event":"game:goal_scored"}"#);
        assert_eq!(*seen.lock().unwrap(), vec![r#"{"a":1}"#, "null"]);
    }

    #[test]
    fn handle_frame_drops_malformed_input() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("game", "goal_scored", move |_| sink.lock().unwrap().push("hit".into()))
            .unwrap();

        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"data":{}}"#,
            r#"{"event":42}"#,
            r#"{"event":"game"}"#,
            r#"{"event":":goal_scored"}"#,
        ] {
            dispatcher.handle_frame(raw);
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn handle_frame_routes_on_first_two_segments() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("game", "goal_scored", move |data| {
                sink.lock().unwrap().push(data.to_string());
            })
            .unwrap();

        dispatcher.handle_frame(r#"{"event":"game:goal_scored:extra","data":1}"#);
        assert_eq!(*seen.lock().unwrap(), vec!["1"]);
    }

    #[test]
    fn reopen_registers_known_keys_again() {
        let (dispatcher, mut rx) = bound();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.subscribe("local", "foo", |_| {}).unwrap();
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        assert_eq!(drain(&mut rx).len(), 1);

        dispatcher.handle_connection_event(ConnectionEvent::Close);
        dispatcher.subscribe("game", "goal_scored", |_| {}).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.bind_outbound(tx).unwrap();
        dispatcher.handle_connection_event(ConnectionEvent::Open);

        // Queued keys first, then the ones from the earlier session.
        assert_eq!(
            drain(&mut rx),
            vec![
                json!({"event": "wsRelay:register", "data": "game:goal_scored"}),
                json!({"event": "wsRelay:register", "data": "game:update_state"}),
            ]
        );
    }

    #[test]
    fn repeated_open_does_not_register_again() {
        let (dispatcher, mut rx) = bound();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        dispatcher.handle_connection_event(ConnectionEvent::Open);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn lifecycle_events_dispatch_on_ws_channel() {
        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("ws", ["open", "error", "close"], move |data| {
                sink.lock().unwrap().push(data.to_string());
            })
            .unwrap();

        dispatcher.handle_connection_event(ConnectionEvent::Open);
        dispatcher.handle_connection_event(ConnectionEvent::Error);
        dispatcher.handle_connection_event(ConnectionEvent::Close);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(!dispatcher.is_connected());
    }

    #[test]
    fn open_callback_may_subscribe_without_deadlock() {
        let (dispatcher, mut rx) = bound();
        let inner = dispatcher.clone();
        dispatcher
            .subscribe("ws", "open", move |_| {
                inner.subscribe("game", "update_state", |_| {}).unwrap();
            })
            .unwrap();

        dispatcher.handle_connection_event(ConnectionEvent::Open);
        // Subscribed before the state flipped, so it went through the queue.
        assert_eq!(
            drain(&mut rx),
            vec![json!({"event": "wsRelay:register", "data": "game:update_state"})]
        );
    }

    #[test]
    fn typed_subscription_skips_mismatched_payloads() {
        #[derive(serde::Deserialize)]
        struct Goal {
            scorer: String,
        }

        let dispatcher = Dispatcher::new();
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe_as("game", "goal_scored", move |goal: Goal| {
                sink.lock().unwrap().push(goal.scorer);
            })
            .unwrap();

        dispatcher.trigger_subscribers("game", "goal_scored", &json!({"scorer": "Ana"}));
        dispatcher.trigger_subscribers("game", "goal_scored", &json!({"other": 1}));
        assert_eq!(*seen.lock().unwrap(), vec!["Ana"]);
    }

    #[test]
    fn dispose_drops_everything() {
        let dispatcher = Dispatcher::new();
        dispatcher.subscribe("game", "update_state", |_| {}).unwrap();
        dispatcher.dispose();
        assert!(dispatcher.keys().is_empty());
        assert!(dispatcher.pending_registrations().is_empty());
    }

    #[test]
    fn independent_dispatchers_share_nothing() {
        let first = Dispatcher::new();
        let second = Dispatcher::new();
        first.subscribe("game", "update_state", |_| {}).unwrap();
        assert!(second.keys().is_empty());
        assert_eq!(first.clone().keys(), vec![key("game", "update_state")]);
    }

    #[test]
    fn frame_log_filters() {
        let k = key("game", "update_state");
        assert!(!FrameLog::disabled().should_log(&k));
        assert!(FrameLog::new(true, None).should_log(&k));
        assert!(!FrameLog::new(true, Some(vec!["game:update_state".into()])).should_log(&k));
        assert!(FrameLog::new(true, Some(vec!["game:goal_scored".into()])).should_log(&k));
    }

    #[test]
    fn frame_log_never_changes_dispatch() {
        let dispatcher =
            Dispatcher::with_frame_log(FrameLog::new(true, Some(vec!["game:update_state".into()])));
        let seen = log();
        let sink = Arc::clone(&seen);
        dispatcher
            .subscribe("game", "update_state", move |_| sink.lock().unwrap().push("hit".into()))
            .unwrap();
        dispatcher.handle_frame(r#"{"event":"game:update_state","data":1}"#);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn bind_twice_is_rejected_while_first_is_live() {
        let (dispatcher, _rx) = bound();
        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(matches!(
            dispatcher.bind_outbound(tx),
            Err(RelayError::AlreadyAttached)
        ));
    }
}
