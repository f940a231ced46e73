#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for `RelayClient`.
//!
//! Uses the channel-based `MockTransport` from `tests/common` to drive the
//! transport loop and observe what the client writes, covering deferred
//! registration, ordered fan-out, local routing and lifecycle events.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use ws_relay_client::{ConnectionEvent, ConnectionState, RelayClient, RelayConfig, RelayError};

use common::{
    collector, frame, next_payload, register, update_state_payload, MockRelay, MockTransport,
    RECV_TIMEOUT,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn new_client() -> RelayClient {
    RelayClient::new(RelayConfig::default())
}

/// Attach a mock transport and wait for the open transition.
async fn open(client: &mut RelayClient) -> (MockRelay, mpsc::Receiver<ConnectionEvent>) {
    let (transport, relay) = MockTransport::pair();
    let mut events = client.attach(transport).expect("attach");
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Open);
    (relay, events)
}

async fn next_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a lifecycle event")
        .expect("event channel closed")
}

// ════════════════════════════════════════════════════════════════════
// Deferred registration
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn queued_registrations_flush_in_order_on_open() {
    let mut client = new_client();
    client.subscribe("game", "update_state", |_| {}).unwrap();
    client.subscribe("game", "goal_scored", |_| {}).unwrap();
    // Known key: no second registration.
    client.subscribe("game", "update_state", |_| {}).unwrap();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_registrations().len(), 2);

    let (mut relay, _events) = open(&mut client).await;
    assert_eq!(relay.next_sent().await, register("game", "update_state"));
    assert_eq!(relay.next_sent().await, register("game", "goal_scored"));
    assert!(client.pending_registrations().is_empty());

    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

#[tokio::test]
async fn array_subscription_registers_cross_product() {
    let mut client = new_client();
    client.subscribe(["a", "b"], ["x", "y"], |_| {}).unwrap();

    let (mut relay, _events) = open(&mut client).await;
    for (channel, event) in [("a", "x"), ("a", "y"), ("b", "x"), ("b", "y")] {
        assert_eq!(relay.next_sent().await, register(channel, event));
    }

    client.shutdown().await;
}

#[tokio::test]
async fn subscribe_while_connected_registers_immediately() {
    let mut client = new_client();
    let (mut relay, _events) = open(&mut client).await;

    client.subscribe("game", "update_state", |_| {}).unwrap();
    assert_eq!(relay.next_sent().await, register("game", "update_state"));

    client.subscribe("game", "update_state", |_| {}).unwrap();
    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

#[tokio::test]
async fn lifecycle_and_local_keys_are_not_registered() {
    let mut client = new_client();
    client.subscribe("ws", "open", |_| {}).unwrap();
    client.subscribe("local", "refresh", |_| {}).unwrap();
    assert!(client.pending_registrations().is_empty());

    let (mut relay, _events) = open(&mut client).await;
    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

// ════════════════════════════════════════════════════════════════════
// Inbound dispatch
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn inbound_frames_reach_callbacks_in_registration_order() {
    let mut client = new_client();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["cb1", "cb2"] {
        let order = Arc::clone(&order);
        client
            .subscribe("game", "update_state", move |data| {
                order.lock().unwrap().push((tag, data.clone()));
            })
            .unwrap();
    }
    let (done, mut done_rx) = collector();
    client.subscribe("game", "update_state", done).unwrap();

    let (relay, _events) = open(&mut client).await;
    let payload = update_state_payload("Ana_1", 287.5);
    relay.push(frame("game", "update_state", payload.clone()));
    assert_eq!(next_payload(&mut done_rx).await, payload);

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 2);
    assert_eq!(order[0], ("cb1", payload.clone()));
    assert_eq!(order[1], ("cb2", payload));
    drop(order);

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_loop_survives() {
    let mut client = new_client();
    let (callback, mut rx) = collector();
    client.subscribe("game", "goal_scored", callback).unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push("definitely not json");
    relay.push(r#"{"data":{"no":"event"}}"#);
    relay.push(r#"{"event":"game_goal_scored"}"#);
    relay.push(r#"{"event":":goal_scored"}"#);
    relay.push(frame("game", "goal_scored", json!({"scorer": "Ana"})));

    assert_eq!(next_payload(&mut rx).await, json!({"scorer": "Ana"}));
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn frames_for_unsubscribed_keys_are_ignored() {
    let mut client = new_client();
    let (callback, mut rx) = collector();
    client.subscribe("game", "goal_scored", callback).unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push(frame("game", "update_state", json!({})));
    relay.push(frame("game", "goal_scored", json!(1)));
    assert_eq!(next_payload(&mut rx).await, json!(1));

    client.shutdown().await;
}

#[tokio::test]
async fn debug_filters_do_not_change_dispatch() {
    let mut client = RelayClient::new(
        RelayConfig::default()
            .with_debug(true)
            .with_debug_filters(["game:update_state"]),
    );
    let (callback, mut rx) = collector();
    client
        .subscribe("game", ["update_state", "goal_scored"], callback)
        .unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push(frame("game", "update_state", json!("filtered")));
    relay.push(frame("game", "goal_scored", json!("logged")));
    assert_eq!(next_payload(&mut rx).await, json!("filtered"));
    assert_eq!(next_payload(&mut rx).await, json!("logged"));

    client.shutdown().await;
}

#[tokio::test]
async fn typed_subscription_receives_decoded_payload() {
    #[derive(Debug, serde::Deserialize)]
    struct Game {
        target: String,
        time: f64,
    }
    #[derive(Debug, serde::Deserialize)]
    struct UpdateState {
        game: Game,
    }

    let mut client = new_client();
    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe_as("game", "update_state", move |state: UpdateState| {
            let _ = tx.send((state.game.target, state.game.time));
        })
        .unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push(frame("game", "update_state", json!({"unrelated": true})));
    relay.push(frame(
        "game",
        "update_state",
        update_state_payload("Ana_1", 61.0),
    ));

    let received = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ("Ana_1".to_string(), 61.0));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Outbound sends
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn remote_send_round_trips_through_relay() {
    let mut client = new_client();
    let (mut relay, _events) = open(&mut client).await;

    client
        .send("game", "goal_scored", json!({"a": 1}))
        .unwrap();
    let sent = relay.next_sent().await;
    let (key, data) = ws_relay_client::protocol::decode_frame(&sent.to_string()).unwrap();
    assert_eq!(key.channel(), "game");
    assert_eq!(key.event(), "goal_scored");
    assert_eq!(data, json!({"a": 1}));

    client.shutdown().await;
}

#[tokio::test]
async fn local_send_never_touches_transport() {
    let mut client = new_client();
    let (callback, mut rx) = collector();
    client.subscribe("local", "foo", callback).unwrap();

    let (mut relay, _events) = open(&mut client).await;
    client.send("local", "foo", json!({"x": 1})).unwrap();
    // Dispatched synchronously inside `send`.
    assert_eq!(rx.try_recv().unwrap(), json!({"x": 1}));

    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

#[tokio::test]
async fn invalid_names_are_reported_and_not_sent() {
    let mut client = new_client();
    let (mut relay, _events) = open(&mut client).await;

    let err = client.send("game:x", "foo", json!({})).unwrap_err();
    assert!(matches!(err, RelayError::InvalidName { .. }));
    let err = client.send("", "foo", json!({})).unwrap_err();
    assert!(matches!(err, RelayError::InvalidName { .. }));

    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

#[tokio::test]
async fn remote_send_before_attach_is_not_connected() {
    let client = new_client();
    let result = client.send("game", "goal_scored", Value::Null);
    assert!(matches!(result, Err(RelayError::NotConnected)));
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ws_open_fires_before_registrations_flush() {
    let mut client = new_client();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client
        .subscribe("ws", ["open", "close"], move |_| {
            sink.lock().unwrap().push("lifecycle");
        })
        .unwrap();
    client.subscribe("game", "update_state", |_| {}).unwrap();

    let (mut relay, mut events) = open(&mut client).await;
    assert_eq!(relay.next_sent().await, register("game", "update_state"));
    assert_eq!(seen.lock().unwrap().len(), 1);

    relay.hang_up();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Close);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(!client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn receive_error_emits_error_then_close() {
    let mut client = new_client();
    let (callback, mut rx) = collector();
    client.subscribe("ws", "error", callback).unwrap();

    let (relay, mut events) = open(&mut client).await;
    relay.fail("connection reset");

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Error);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Close);
    assert_eq!(next_payload(&mut rx).await, Value::Null);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.shutdown().await;
}

#[tokio::test]
async fn subscriptions_after_disconnect_queue_for_next_attach() {
    let mut client = new_client();
    let (relay, mut events) = open(&mut client).await;
    relay.hang_up();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Close);

    client.subscribe("game", "goal_scored", |_| {}).unwrap();
    assert_eq!(client.pending_registrations().len(), 1);

    let (mut relay, _events) = open(&mut client).await;
    assert_eq!(relay.next_sent().await, register("game", "goal_scored"));

    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_registers_earlier_subscriptions_again() {
    let mut client = new_client();
    client.subscribe("game", "update_state", |_| {}).unwrap();

    let (mut relay, mut events) = open(&mut client).await;
    assert_eq!(relay.next_sent().await, register("game", "update_state"));
    relay.hang_up();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Close);

    let (mut relay, _events) = open(&mut client).await;
    assert_eq!(relay.next_sent().await, register("game", "update_state"));

    client.shutdown().await;
    assert!(relay.drain_sent().is_empty());
}

#[tokio::test]
async fn multi_segment_event_reaches_first_two_segments() {
    let mut client = new_client();
    let (callback, mut rx) = collector();
    client.subscribe("game", "goal_scored", callback).unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push(r#"{"event":"game:goal_scored:extra","data":1}"#);
    assert_eq!(next_payload(&mut rx).await, json!(1));

    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_transport() {
    let mut client = new_client();
    let (relay, mut events) = open(&mut client).await;

    client.shutdown().await;
    assert!(relay.was_closed());
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Close);
    assert!(!client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Clearing and disposal
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn clear_event_callbacks_keeps_sibling_events() {
    let mut client = new_client();
    let (update_cb, mut update_rx) = collector();
    let (goal_cb, mut goal_rx) = collector();
    client.subscribe("game", "update_state", update_cb).unwrap();
    client.subscribe("game", "goal_scored", goal_cb).unwrap();

    assert_eq!(client.clear_event_callbacks("game", "update_state").unwrap(), 1);

    let (relay, _events) = open(&mut client).await;
    relay.push(frame("game", "update_state", json!(1)));
    relay.push(frame("game", "goal_scored", json!(2)));
    assert_eq!(next_payload(&mut goal_rx).await, json!(2));
    assert!(update_rx.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test]
async fn dispose_drops_subscriptions_and_queue() {
    let client = new_client();
    client.subscribe("game", "update_state", |_| {}).unwrap();
    client.dispose();
    assert!(client.pending_registrations().is_empty());
    assert_eq!(
        client.trigger_subscribers("game", "update_state", &json!({})),
        0
    );
}

#[tokio::test]
async fn callbacks_can_send_through_dispatcher_handle() {
    let mut client = new_client();
    let dispatcher = client.dispatcher();
    client
        .subscribe("game", "goal_scored", move |_| {
            dispatcher
                .send("local", "animate_goal", json!({"ms": 2500}))
                .unwrap();
        })
        .unwrap();
    let (callback, mut rx) = collector();
    client.subscribe("local", "animate_goal", callback).unwrap();

    let (relay, _events) = open(&mut client).await;
    relay.push(frame("game", "goal_scored", json!({})));
    assert_eq!(next_payload(&mut rx).await, json!({"ms": 2500}));

    client.shutdown().await;
}
