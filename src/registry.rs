//! In-memory subscription registry.
//!
//! Maps channel → event → ordered callbacks. Callbacks under one key run in
//! the order they were registered; the same callback registered twice runs
//! twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::protocol::{validate_name, SubscriptionKey};

/// A subscriber callback. Receives the event payload.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

// ── Names ───────────────────────────────────────────────────────────

/// One or many channel or event names, in order.
///
/// Built from a single name or from any ordered collection of names:
///
/// ```
/// use ws_relay_client::registry::Names;
///
/// assert_eq!(Names::from("game").len(), 1);
/// assert_eq!(Names::from(["update_state", "goal_scored"]).len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Names(Vec<String>);

impl Names {
    /// Number of names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no names.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<&str> for Names {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl From<String> for Names {
    fn from(name: String) -> Self {
        Self(vec![name])
    }
}

impl From<&String> for Names {
    fn from(name: &String) -> Self {
        Self(vec![name.clone()])
    }
}

impl From<Vec<String>> for Names {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<Vec<&str>> for Names {
    fn from(names: Vec<&str>) -> Self {
        Self(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Names {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|n| (*n).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Names {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|n| (*n).to_string()).collect())
    }
}

/// Expand channels × events into keys, channel-major.
///
/// # Errors
///
/// Returns [`RelayError::EmptyNames`] if either side is empty, or
/// [`RelayError::InvalidName`] for the first rejected name.
pub fn cross_product(channels: &Names, events: &Names) -> Result<Vec<SubscriptionKey>> {
    if channels.is_empty() {
        return Err(RelayError::EmptyNames("channel"));
    }
    if events.is_empty() {
        return Err(RelayError::EmptyNames("event"));
    }
    for channel in channels.iter() {
        validate_name("channel", channel)?;
    }
    for event in events.iter() {
        validate_name("event", event)?;
    }

    let mut keys = Vec::with_capacity(channels.len() * events.len());
    for channel in channels.iter() {
        for event in events.iter() {
            keys.push(SubscriptionKey::new(channel, event)?);
        }
    }
    Ok(keys)
}

// ── Registry ────────────────────────────────────────────────────────

/// Channel → event → ordered callbacks.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, HashMap<String, Vec<Callback>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the list for `key`.
    ///
    /// Returns `true` if this is the first time `key` is seen, i.e. the
    /// caller should request remote registration for it.
    pub fn insert(&mut self, key: &SubscriptionKey, callback: Callback) -> bool {
        let events = self.channels.entry(key.channel().to_string()).or_default();
        match events.get_mut(key.event()) {
            Some(callbacks) => {
                callbacks.push(callback);
                false
            }
            None => {
                events.insert(key.event().to_string(), vec![callback]);
                true
            }
        }
    }

    /// Remove every callback registered under `key`, leaving other events
    /// on the same channel untouched.
    ///
    /// Returns the number of callbacks removed.
    pub fn clear(&mut self, key: &SubscriptionKey) -> usize {
        let Some(events) = self.channels.get_mut(key.channel()) else {
            return 0;
        };
        let removed = events.remove(key.event()).map_or(0, |callbacks| callbacks.len());
        if events.is_empty() {
            self.channels.remove(key.channel());
        }
        removed
    }

    /// Drop every registration.
    pub fn clear_all(&mut self) {
        self.channels.clear();
    }

    /// Returns `true` if `key` has an entry.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.channels
            .get(key.channel())
            .is_some_and(|events| events.contains_key(key.event()))
    }

    /// Number of callbacks registered under `key`.
    pub fn callback_count(&self, key: &SubscriptionKey) -> usize {
        self.lookup(key.channel(), key.event()).map_or(0, <[Callback]>::len)
    }

    /// Callbacks for `(channel, event)` in registration order, if any.
    pub fn lookup(&self, channel: &str, event: &str) -> Option<&[Callback]> {
        self.channels
            .get(channel)?
            .get(event)
            .map(Vec::as_slice)
    }

    /// Clone the callback list for `(channel, event)` so it can be invoked
    /// without holding a borrow on the registry.
    pub fn snapshot(&self, channel: &str, event: &str) -> Vec<Callback> {
        self.lookup(channel, event)
            .map(<[Callback]>::to_vec)
            .unwrap_or_default()
    }

    /// Every registered key, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self
            .channels
            .iter()
            .flat_map(|(channel, events)| {
                events.keys().filter_map(move |event| {
                    SubscriptionKey::new(channel.as_str(), event.as_str()).ok()
                })
            })
            .collect();
        keys.sort();
        keys
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(String, usize)> = self
            .keys()
            .into_iter()
            .map(|key| {
                let count = self.callback_count(&key);
                (key.to_string(), count)
            })
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &counts)
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
    use std::sync::Mutex;

    fn key(channel: &str, event: &str) -> SubscriptionKey {
        SubscriptionKey::new(channel, event).unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Callback {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move |data: &Value| log.lock().unwrap().push(format!("{tag}:{data}")))
    }

    #[test]
    fn first_insert_reports_new_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.insert(&key("game", "update_state"), recorder(&log, "a")));
        assert!(!registry.insert(&key("game", "update_state"), recorder(&log, "b")));
        assert!(registry.insert(&key("game", "goal_scored"), recorder(&log, "c")));
        assert_eq!(registry.callback_count(&key("game", "update_state")), 2);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        let k = key("game", "update_state");
        registry.insert(&k, recorder(&log, "first"));
        registry.insert(&k, recorder(&log, "second"));

        for callback in registry.snapshot("game", "update_state") {
            callback(&Value::from(1));
        }
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn clear_only_removes_one_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.insert(&key("game", "update_state"), recorder(&log, "a"));
        registry.insert(&key("game", "goal_scored"), recorder(&log, "b"));

        assert_eq!(registry.clear(&key("game", "update_state")), 1);
        assert!(!registry.contains(&key("game", "update_state")));
        assert!(registry.contains(&key("game", "goal_scored")));
        assert_eq!(registry.clear(&key("game", "missing")), 0);
    }

    #[test]
    fn clearing_last_event_drops_channel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.insert(&key("game", "update_state"), recorder(&log, "a"));
        registry.clear(&key("game", "update_state"));
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_are_sorted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.insert(&key("b", "y"), recorder(&log, "1"));
        registry.insert(&key("a", "x"), recorder(&log, "2"));
        registry.insert(&key("b", "x"), recorder(&log, "3"));
        assert_eq!(
            registry.keys(),
            vec![key("a", "x"), key("b", "x"), key("b", "y")]
        );
    }

    #[test]
    fn cross_product_is_channel_major() {
        let keys = cross_product(&Names::from(["a", "b"]), &Names::from(["x", "y"])).unwrap();
        assert_eq!(
            keys,
            vec![key("a", "x"), key("a", "y"), key("b", "x"), key("b", "y")]
        );
    }

    #[test]
    fn cross_product_rejects_empty_collections() {
        let empty: Vec<&str> = Vec::new();
        let err = cross_product(&Names::from(empty.clone()), &Names::from("x")).unwrap_err();
        assert!(matches!(err, RelayError::EmptyNames("channel")));
        let err = cross_product(&Names::from("a"), &Names::from(empty)).unwrap_err();
        assert!(matches!(err, RelayError::EmptyNames("event")));
    }

    #[test]
    fn cross_product_rejects_separator_in_names() {
        let err = cross_product(&Names::from("a:b"), &Names::from("x")).unwrap_err();
        assert!(matches!(err, RelayError::InvalidName { kind: "channel", .. }));
    }
}
