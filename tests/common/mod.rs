#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the relay client integration tests.
//!
//! Provides a channel-based [`MockTransport`] driven by a [`MockRelay`]
//! handle, plus helpers for building relay frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use ws_relay_client::{RelayError, Transport};

/// How long a test waits for a frame before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted item delivered by [`MockTransport::recv`]. `None` closes the
/// connection cleanly.
pub type Incoming = Option<Result<String, RelayError>>;

/// Client half of an in-process connection.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Relay half: inject frames, read what the client wrote.
pub struct MockRelay {
    pub incoming: mpsc::UnboundedSender<Incoming>,
    pub sent: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a connected `(transport, relay)` pair.
    pub fn pair() -> (Self, MockRelay) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: incoming_rx,
            sent: sent_tx,
            closed: Arc::clone(&closed),
        };
        let relay = MockRelay {
            incoming: incoming_tx,
            sent: sent_rx,
            closed,
        };
        (transport, relay)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RelayError> {
        self.sent
            .send(message)
            .map_err(|e| RelayError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        match self.incoming.recv().await {
            Some(item) => item,
            // Relay handle dropped: stay open until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockRelay {
    /// Push a frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.incoming.send(Some(Ok(frame.into()))).unwrap();
    }

    /// Push a transport error to the client.
    pub fn fail(&self, reason: &str) {
        self.incoming
            .send(Some(Err(RelayError::TransportReceive(reason.into()))))
            .unwrap();
    }

    /// Close the connection from the relay side.
    pub fn hang_up(&self) {
        self.incoming.send(None).unwrap();
    }

    /// Next frame the client wrote, parsed as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(RECV_TIMEOUT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("client wrote invalid JSON")
    }

    /// Frames the client wrote so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client wrote invalid JSON"));
        }
        frames
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

/// A relay frame for `channel:event` carrying `data`.
pub fn frame(channel: &str, event: &str, data: Value) -> String {
    json!({ "event": format!("{channel}:{event}"), "data": data }).to_string()
}

/// The registration frame the client sends for `channel:event`.
pub fn register(channel: &str, event: &str) -> Value {
    json!({ "event": "wsRelay:register", "data": format!("{channel}:{event}") })
}

/// A trimmed `game:update_state` payload as the game plugin sends it.
pub fn update_state_payload(target: &str, time: f64) -> Value {
    json!({
        "game": {
            "target": target,
            "time": time,
            "teams": {
                "0": { "score": 1 },
                "1": { "score": 2 }
            }
        },
        "players": {
            "Ana_1": {
                "name": "Ana",
                "team": 0,
                "score": 320,
                "goals": 1,
                "assists": 0,
                "saves": 2,
                "boost": 45
            }
        }
    })
}

/// Forward every payload a callback receives into a channel the test can
/// await.
pub fn collector() -> (
    impl Fn(&Value) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |data: &Value| {
        let _ = tx.send(data.clone());
    };
    (callback, rx)
}

/// Await the next collected payload.
pub async fn next_payload(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("collector dropped")
}
