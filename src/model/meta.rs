//! Free-form metadata attached to schemas and operations.
//!
//! Spec §4.4 requires the service facade to stamp `meta.session`,
//! `meta.user`, and `meta.time`, overriding any client-supplied values for
//! exactly those three keys while preserving every other key the client
//! sent. A typed struct with three fixed fields would lose that "preserve
//! unknown keys" property, so `Meta` wraps a JSON object directly —
//! matching the spec's own description of `meta` as an open map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `meta` bag: a JSON object with three well-known keys (`session`,
/// `user`, `time`) and arbitrary client-supplied extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(Map<String, Value>);

const SESSION_KEY: &str = "session";
const USER_KEY: &str = "user";
const TIME_KEY: &str = "time";

impl Meta {
    /// An empty meta bag.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a raw JSON object as a `Meta` bag.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The session identifier, if present and a string.
    pub fn session(&self) -> Option<&str> {
        self.0.get(SESSION_KEY).and_then(Value::as_str)
    }

    /// The user identifier, if present and a string.
    pub fn user(&self) -> Option<&str> {
        self.0.get(USER_KEY).and_then(Value::as_str)
    }

    /// The timestamp, if present and a string (RFC 3339).
    pub fn time(&self) -> Option<&str> {
        self.0.get(TIME_KEY).and_then(Value::as_str)
    }

    /// Stamp `session`, `user`, and `time`, overriding any existing values
    /// for exactly those three keys. Every other key is left untouched.
    pub fn stamp(&mut self, session: &str, user: &str, time_rfc3339: &str) {
        self.0
            .insert(SESSION_KEY.to_string(), Value::String(session.to_string()));
        self.0
            .insert(USER_KEY.to_string(), Value::String(user.to_string()));
        self.0
            .insert(TIME_KEY.to_string(), Value::String(time_rfc3339.to_string()));
    }

    /// Serialized size in bytes, used when checking entity size ceilings.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_overrides_only_the_three_keys() {
        let mut meta = Meta::from_map(
            serde_json::json!({"session": "old", "custom": "keep-me"})
                .as_object()
                .unwrap()
                .clone(),
        );
        meta.stamp("sess-1", "user-1", "2026-07-31T00:00:00Z");

        assert_eq!(meta.session(), Some("sess-1"));
        assert_eq!(meta.user(), Some("user-1"));
        assert_eq!(meta.time(), Some("2026-07-31T00:00:00Z"));
        assert_eq!(
            meta.as_map().get("custom").and_then(Value::as_str),
            Some("keep-me")
        );
    }
}
