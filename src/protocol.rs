//! Wire format for the relay protocol.
//!
//! Every frame is a JSON text message of the shape
//! `{"event": "<channel>:<event>", "data": <any>}`. Channel and event names
//! may not contain the `:` separator. Inbound event strings are routed on
//! their first two segments, so `game:goal_scored:extra` reaches
//! `game:goal_scored`.
//!
//! Registration frames tell the relay which composite keys this client wants
//! forwarded:
//!
//! ```
//! use ws_relay_client::protocol::{Frame, SubscriptionKey};
//!
//! let key = SubscriptionKey::new("game", "update_state").unwrap();
//! let frame = Frame::register(&key);
//! assert_eq!(
//!     frame.encode().unwrap(),
//!     r#"{"event":"wsRelay:register","data":"game:update_state"}"#
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

// ── Constants ───────────────────────────────────────────────────────

/// Port the relay server listens on by default.
pub const DEFAULT_PORT: u16 = 49322;

/// Separator between channel and event in the composite event string.
pub const SEPARATOR: char = ':';

/// In-process channel; sends on it are dispatched locally and never written
/// to the transport.
pub const LOCAL_CHANNEL: &str = "local";

/// In-process channel carrying connection lifecycle events.
pub const LIFECYCLE_CHANNEL: &str = "ws";

/// Channel of the relay's own control events.
pub const RELAY_CHANNEL: &str = "wsRelay";

/// Control event asking the relay to forward a composite key.
pub const REGISTER_EVENT: &str = "register";

/// Returns the local WebSocket endpoint for the given port.
pub fn local_endpoint(port: u16) -> String {
    format!("ws://localhost:{port}")
}

/// Returns the endpoint used when none is configured (`ws://localhost:49322`).
pub fn default_endpoint() -> String {
    local_endpoint(DEFAULT_PORT)
}

/// Returns `true` for channels that never cross the transport.
pub fn is_in_process_channel(channel: &str) -> bool {
    channel == LOCAL_CHANNEL || channel == LIFECYCLE_CHANNEL
}

/// Check that `name` can be used as the `kind` half of a subscription key.
///
/// # Errors
///
/// Returns [`RelayError::InvalidName`] if `name` is empty or contains the
/// [`SEPARATOR`].
pub fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RelayError::InvalidName {
            kind,
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.contains(SEPARATOR) {
        return Err(RelayError::InvalidName {
            kind,
            name: name.to_string(),
            reason: "must not contain ':'",
        });
    }
    Ok(())
}

// ── SubscriptionKey ─────────────────────────────────────────────────

/// A `(channel, event)` pair identifying one dispatch target.
///
/// Equality is exact string match on both parts. Displays as
/// `"channel:event"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    channel: String,
    event: String,
}

impl SubscriptionKey {
    /// Build a key from a channel and event name.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidName`] if either name is empty or contains `:`.
    pub fn new(channel: impl Into<String>, event: impl Into<String>) -> Result<Self> {
        let channel = channel.into();
        let event = event.into();
        validate_name("channel", &channel)?;
        validate_name("event", &event)?;
        Ok(Self { channel, event })
    }

    /// Parse a composite `"channel:event"` string.
    ///
    /// The first segment is the channel and the second the event; anything
    /// after a further separator is ignored. Returns `None` when there is no
    /// separator or either of the first two segments is empty.
    pub fn parse(composite: &str) -> Option<Self> {
        let mut segments = composite.split(SEPARATOR);
        let channel = segments.next()?;
        let event = segments.next()?;
        Self::new(channel, event).ok()
    }

    /// The channel half of the key.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The event half of the key.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns `true` if this key lives on an in-process channel.
    pub fn is_in_process(&self) -> bool {
        is_in_process_channel(&self.channel)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.channel, self.event)
    }
}

// ── Frame ───────────────────────────────────────────────────────────

/// One JSON text frame exchanged with the relay.
///
/// A missing `data` field decodes as [`Value::Null`]; a null payload is
/// omitted when encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Composite `"channel:event"` string.
    pub event: String,
    /// Arbitrary payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    /// Build a frame addressed to `key`.
    pub fn new(key: &SubscriptionKey, data: Value) -> Self {
        Self {
            event: key.to_string(),
            data,
        }
    }

    /// Build the `wsRelay:register` frame requesting that `key` be forwarded.
    pub fn register(key: &SubscriptionKey) -> Self {
        Self {
            event: format!("{RELAY_CHANNEL}{SEPARATOR}{REGISTER_EVENT}"),
            data: Value::String(key.to_string()),
        }
    }

    /// Serialize the frame into a single JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Serialization`] if the payload cannot be encoded.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text message into a frame.
    ///
    /// Returns `None` for anything that is not a JSON object with a string
    /// `event` field.
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// The subscription key this frame is addressed to, if its event string
    /// is well formed.
    pub fn key(&self) -> Option<SubscriptionKey> {
        SubscriptionKey::parse(&self.event)
    }

    /// Split the frame into its key and payload.
    pub fn into_parts(self) -> Option<(SubscriptionKey, Value)> {
        let key = self.key()?;
        Some((key, self.data))
    }
}

/// Decode an inbound text message into its key and payload.
///
/// Returns `None` when the message is not part of this protocol: not JSON,
/// not an object, no string `event` field, or an event string without a
/// separator. Event strings with an empty channel or event segment (`":x"`,
/// `"game:"`) are dropped too, although a relay may still emit them.
pub fn decode_frame(text: &str) -> Option<(SubscriptionKey, Value)> {
    Frame::decode(text)?.into_parts()
}
