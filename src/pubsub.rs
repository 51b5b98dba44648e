//! The pub/sub collaborator (spec §6 "Pub/Sub interface") and its topic
//! encoding.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque handle returned by [`PubSub::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// A callback invoked with a published message.
pub type Callback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Cross-process (or in-process) fan-out for `operation(type, id)` topics.
///
/// Delivery is at-least-once within a process (spec §5); the
/// [`crate::stream::OperationStream`]'s `versionNext` gate tolerates the
/// resulting duplicates.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, message: serde_json::Value) -> Result<()>;

    /// Subscribe to a channel, returning a handle for [`Self::unsubscribe`].
    async fn subscribe(&self, channel: &str, callback: Callback) -> Result<SubscriptionId>;

    /// Unsubscribe a previously-registered callback.
    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<()>;
}

/// Build the `"operation" ⋄ type ⋄ id` topic name using the escaping join
/// from spec §6: `~` separates parts, `!` escapes `!` and `~`.
pub fn operation_topic(doc_type: &str, id: &str) -> String {
    join(&["operation", doc_type, id])
}

/// Escaping join: every `!` becomes `!!`, every `~` becomes `!~`, then
/// parts are joined with bare `~`.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| escape(part))
        .collect::<Vec<_>>()
        .join("~")
}

/// Inverse of [`join`]: split a joined topic back into its parts.
pub fn split(topic: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = topic.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '!' => match chars.next() {
                Some('!') => current.push('!'),
                Some('~') => current.push('~'),
                Some(other) => {
                    // Malformed escape; pass both characters through verbatim
                    // rather than panicking on untrusted input.
                    current.push('!');
                    current.push(other);
                },
                None => current.push('!'),
            },
            '~' => {
                parts.push(std::mem::take(&mut current));
            },
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}

fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '!' => out.push_str("!!"),
            '~' => out.push_str("!~"),
            other => out.push(other),
        }
    }
    out
}
