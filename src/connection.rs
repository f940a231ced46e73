//! Connection state machine and deferred registration queue.
//!
//! [`ConnectionManager`] is pure state: the transport loop in
//! [`client`](crate::client) feeds it [`ConnectionEvent`]s and performs the
//! I/O it asks for. Registration requests made while disconnected are
//! queued and handed back exactly once, in order, on the next open.

use crate::protocol::SubscriptionKey;

/// Whether the transport connection is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No open connection. Initial state.
    #[default]
    Disconnected,
    /// The transport is open; remote sends go out immediately.
    Connected,
}

impl ConnectionState {
    /// The state reached after `event`, from any state.
    pub fn transition(self, event: ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Open => Self::Connected,
            ConnectionEvent::Error | ConnectionEvent::Close => Self::Disconnected,
        }
    }
}

/// Lifecycle events emitted by the transport loop.
///
/// Each one is also dispatched locally on the `ws` channel under
/// [`ConnectionEvent::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport opened.
    Open,
    /// The transport reported an error.
    Error,
    /// The transport closed.
    Close,
}

impl ConnectionEvent {
    /// Event name on the `ws` channel (`"open"`, `"error"`, `"close"`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

/// What to do with a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Connected: send the register frame for this key now.
    SendNow(SubscriptionKey),
    /// Disconnected: the key was queued for the next open.
    Queued,
}

/// Connection state plus the queue of registrations awaiting an open.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    pending: Vec<SubscriptionKey>,
}

impl ConnectionManager {
    /// A disconnected manager with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns `true` when connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Keys queued for registration, in enqueue order.
    pub fn pending(&self) -> &[SubscriptionKey] {
        &self.pending
    }

    /// Decide whether `key` is registered now or on the next open.
    pub fn request_registration(&mut self, key: SubscriptionKey) -> Registration {
        if self.is_connected() {
            Registration::SendNow(key)
        } else {
            self.pending.push(key);
            Registration::Queued
        }
    }

    /// Apply a lifecycle event.
    ///
    /// On a Disconnected→Connected transition the pending queue is drained
    /// and returned; every other transition returns an empty list.
    pub fn apply(&mut self, event: ConnectionEvent) -> Vec<SubscriptionKey> {
        let previous = self.state;
        self.state = previous.transition(event);
        if previous == ConnectionState::Disconnected && self.is_connected() {
            std::mem::take(&mut self.pending)
        } else {
            Vec::new()
        }
    }

    /// Forget every queued registration.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
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

    fn key(channel: &str, event: &str) -> SubscriptionKey {
        SubscriptionKey::new(channel, event).unwrap()
    }

    #[test]
    fn starts_disconnected() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn transition_table() {
        use ConnectionEvent::{Close, Error, Open};
        use ConnectionState::{Connected, Disconnected};

        assert_eq!(Disconnected.transition(Open), Connected);
        assert_eq!(Connected.transition(Open), Connected);
        assert_eq!(Connected.transition(Error), Disconnected);
        assert_eq!(Connected.transition(Close), Disconnected);
        assert_eq!(Disconnected.transition(Close), Disconnected);
    }

    #[test]
    fn queued_keys_drain_once_in_order() {
        let mut manager = ConnectionManager::new();
        assert_eq!(
            manager.request_registration(key("game", "update_state")),
            Registration::Queued
        );
        assert_eq!(
            manager.request_registration(key("game", "goal_scored")),
            Registration::Queued
        );

        let drained = manager.apply(ConnectionEvent::Open);
        assert_eq!(
            drained,
            vec![key("game", "update_state"), key("game", "goal_scored")]
        );
        assert!(manager.pending().is_empty());

        // A second open while already connected drains nothing.
        assert!(manager.apply(ConnectionEvent::Open).is_empty());
    }

    #[test]
    fn connected_requests_send_immediately() {
        let mut manager = ConnectionManager::new();
        manager.apply(ConnectionEvent::Open);
        assert_eq!(
            manager.request_registration(key("game", "update_state")),
            Registration::SendNow(key("game", "update_state"))
        );
        assert!(manager.pending().is_empty());
    }

    #[test]
    fn requests_queue_again_after_close() {
        let mut manager = ConnectionManager::new();
        manager.apply(ConnectionEvent::Open);
        manager.apply(ConnectionEvent::Error);
        assert!(!manager.is_connected());

        manager.request_registration(key("game", "update_state"));
        assert_eq!(manager.pending(), &[key("game", "update_state")]);
        assert_eq!(
            manager.apply(ConnectionEvent::Open),
            vec![key("game", "update_state")]
        );
    }

    #[test]
    fn event_names() {
        assert_eq!(ConnectionEvent::Open.name(), "open");
        assert_eq!(ConnectionEvent::Error.name(), "error");
        assert_eq!(ConnectionEvent::Close.name(), "close");
    }
}
