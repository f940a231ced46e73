//! # Scoreboard Overlay Example
//!
//! A terminal stand-in for a broadcast overlay. Connects to the relay,
//! subscribes to `game:update_state` and `game:goal_scored`, and renders the
//! score, the match clock and the focused player's card. A goal shows a
//! banner that hides itself after 2.5 seconds.
//!
//! ## Running
//!
//! ```sh
//! # Start the relay on localhost:49322, then:
//! cargo run --example scoreboard
//!
//! # Another endpoint, with every inbound frame logged except state updates:
//! RELAY_URL=ws://localhost:50000 RELAY_DEBUG=1 cargo run --example scoreboard
//! ```

use std::time::Duration;

use serde_json::Value;
use ws_relay_client::{ConnectionEvent, RelayClient, RelayConfig};

/// How long the goal banner stays up.
const GOAL_BANNER: Duration = Duration::from_millis(2500);

// ── Presentation adapters ───────────────────────────────────────────

/// Index into an array or an object keyed by the same number.
fn team<'a>(teams: &'a Value, index: usize) -> &'a Value {
    match teams {
        Value::Array(items) => items.get(index).unwrap_or(&Value::Null),
        other => &other[index.to_string().as_str()],
    }
}

fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render remaining seconds as `m:ss`, rounding partial seconds up.
fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).ceil() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn render_score(state: &Value) {
    let teams = &state["game"]["teams"];
    println!(
        "BLUE {} - {} ORANGE",
        text(&team(teams, 0)["score"]),
        text(&team(teams, 1)["score"])
    );
}

fn render_clock(state: &Value) {
    println!("clock {}", format_clock(number(&state["game"]["time"])));
}

fn render_player_card(state: &Value) {
    let target = text(&state["game"]["target"]);
    if target.is_empty() {
        println!("(no player card)");
        return;
    }
    let player = &state["players"][target.as_str()];
    let side = if number(&player["team"]) == 0.0 {
        "blue"
    } else {
        "orange"
    };
    println!(
        "[{side}] {} | score {} goals {} assists {} saves {} | boost {}%",
        text(&player["name"]),
        text(&player["score"]),
        text(&player["goals"]),
        text(&player["assists"]),
        text(&player["saves"]),
        number(&player["boost"]).trunc()
    );
}

fn show_goal_banner() {
    println!(">>> GOAL <<<");
    tokio::spawn(async {
        tokio::time::sleep(GOAL_BANNER).await;
        println!("(goal banner hidden)");
    });
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = RelayConfig::default();
    if let Ok(url) = std::env::var("RELAY_URL") {
        config = config.with_endpoint(url);
    }
    if std::env::var_os("RELAY_DEBUG").is_some() {
        config = config
            .with_debug(true)
            .with_debug_filters(["game:update_state"]);
    }
    tracing::info!("connecting to {}", config.endpoint);

    let mut client = RelayClient::new(config);
    client.subscribe("game", "update_state", |state| {
        render_player_card(state);
        render_score(state);
        render_clock(state);
    })?;
    // Callbacks run on the transport loop task, so the banner timer can spawn.
    client.subscribe("game", "goal_scored", |_| show_goal_banner())?;

    let mut events = client.connect().await?;
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ConnectionEvent::Open) => tracing::info!("relay connected"),
                    Some(ConnectionEvent::Error) => tracing::warn!("relay connection error"),
                    Some(ConnectionEvent::Close) | None => {
                        tracing::warn!("relay connection closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
