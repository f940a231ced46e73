//! # Loopback Relay Example
//!
//! Implements [`Transport`] over in-process channels and plays the relay
//! server by hand:
//!
//! 1. Subscribe before any connection exists (registrations are queued)
//! 2. Attach the loopback transport (queued registrations are flushed)
//! 3. Push a frame from the "relay" and watch the callback fire
//! 4. Send a local event that never reaches the relay
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_relay
//! ```

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use ws_relay_client::{ConnectionEvent, RelayClient, RelayConfig, RelayError, Transport};

/// Client half of the loopback.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Relay half of the loopback.
struct LoopbackRelay {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackRelay) {
    let (client_tx, relay_rx) = mpsc::unbounded_channel();
    let (relay_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackRelay {
            rx: relay_rx,
            tx: relay_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), RelayError> {
        self.tx
            .send(message)
            .map_err(|e| RelayError::TransportSend(e.to_string()))
    }

    /// `None` once the relay half is dropped. Cancel-safe because
    /// `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut client = RelayClient::new(RelayConfig::default().with_debug(true));

    let (goal_tx, mut goal_rx) = mpsc::unbounded_channel();
    client.subscribe("game", "goal_scored", move |data| {
        let _ = goal_tx.send(data.clone());
    })?;
    client.subscribe("local", "hello", |data| {
        tracing::info!("local event: {data}");
    })?;
    tracing::info!("queued registrations: {:?}", client.pending_registrations());

    let (transport, mut relay) = loopback_pair();
    let mut events = client.attach(transport)?;
    if events.recv().await != Some(ConnectionEvent::Open) {
        return Err("expected the connection to open".into());
    }

    // The relay sees exactly one registration for the queued key.
    let Some(register) = relay.rx.recv().await else {
        return Err("relay closed before registration arrived".into());
    };
    tracing::info!("relay received: {register}");

    relay
        .tx
        .send(json!({"event": "game:goal_scored", "data": {"scorer": "Ana"}}).to_string())?;
    if let Some(goal) = goal_rx.recv().await {
        tracing::info!("goal callback fired with {goal}");
    }

    client.send("local", "hello", json!({"from": "demo"}))?;

    client.shutdown().await;
    tracing::info!("done; relay saw no local traffic: {}", relay.rx.try_recv().is_err());
    Ok(())
}
