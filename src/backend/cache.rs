//! The document cache entry and the expiring set that bounds its lifetime
//! (spec §3 "Document Cache Entry", §4.3.5 "Cache discipline").

use crate::content_type::ContentType;
use crate::error::Result;
use crate::model::{DocKey, Operation, Snapshot};
use indexmap::IndexSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A document's cached state: an anchor `snapshot` plus the contiguous run
/// of operations immediately following it.
///
/// Invariant (spec §3, §8 "Cache soundness"): for every `i`,
/// `operations[i].version == snapshot.version + 1 + i`.
pub struct CacheEntry {
    pub snapshot: Snapshot,
    operations: std::collections::VecDeque<(Instant, Operation)>,
}

impl CacheEntry {
    /// A fresh entry anchored at `snapshot`, with no buffered operations.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            operations: std::collections::VecDeque::new(),
        }
    }

    /// The version immediately after the last cached operation (or the
    /// anchor snapshot's version if none are buffered) — i.e. the version
    /// this entry can serve up to without consulting the store.
    pub fn served_version(&self) -> u32 {
        self.operations
            .back()
            .map(|(_, op)| op.version)
            .unwrap_or(self.snapshot.version)
    }

    /// Append an operation. Caller must ensure contiguity
    /// (`op.version == served_version() + 1`); this is a bookkeeping-only
    /// append, not an `apply` — it does not touch `snapshot`.
    pub fn push_operation(&mut self, op: Operation) {
        debug_assert_eq!(op.version, self.served_version() + 1);
        self.operations.push_back((Instant::now(), op));
    }

    /// Buffered operations in increasing version order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(|(_, op)| op)
    }

    /// Compute the snapshot at `v`, applying buffered operations starting
    /// from the anchor. Returns `None` if `v` is outside what this entry can
    /// serve (`v < snapshot.version` or `v > served_version()`).
    pub fn snapshot_at(&self, content_type: &ContentType, v: u32) -> Result<Option<Snapshot>> {
        if v < self.snapshot.version || v > self.served_version() {
            return Ok(None);
        }
        let mut current = self.snapshot.clone();
        for op in self.operations() {
            if current.version >= v {
                break;
            }
            current = content_type.apply(&current, op)?;
        }
        Ok(Some(current))
    }

    /// Fold operations older than `ttl` or past `limit` into `snapshot`,
    /// bounding memory (spec §4.3.5).
    pub fn evict(&mut self, content_type: &ContentType, ttl: Duration, limit: usize) -> Result<()> {
        loop {
            let should_evict = match self.operations.front() {
                None => false,
                Some((inserted, _)) => inserted.elapsed() > ttl || self.operations.len() > limit,
            };
            if !should_evict {
                break;
            }
            let (_, op) = self.operations.pop_front().expect("checked non-empty above");
            self.snapshot = content_type.apply(&self.snapshot, &op)?;
        }
        Ok(())
    }
}

/// The set of cache entries pending expiry, ordered so insertion order
/// equals expiration order (spec §4.3.5).
///
/// An entry pinned by an open stream is absent from this set entirely;
/// `touch` re-adds it only once unpinned.
pub struct ExpiringSet {
    order: Mutex<IndexSet<DocKey>>,
    expire_at: dashmap::DashMap<DocKey, Instant>,
}

impl Default for ExpiringSet {
    fn default() -> Self {
        Self {
            order: Mutex::new(IndexSet::new()),
            expire_at: dashmap::DashMap::new(),
        }
    }
}

impl ExpiringSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `key` from the expiring set (it's pinned by an open stream).
    pub async fn pin(&self, key: &DocKey) {
        self.order.lock().await.shift_remove(key);
        self.expire_at.remove(key);
    }

    /// Schedule `key` to expire `ttl` from now, moving it to the back of
    /// the set if already present.
    pub async fn schedule(&self, key: DocKey, ttl: Duration) {
        let mut order = self.order.lock().await;
        order.shift_remove(&key);
        order.insert(key.clone());
        self.expire_at.insert(key, Instant::now() + ttl);
    }

    /// Pop every entry whose `expireAt <= now`, in expiration order.
    pub async fn sweep_expired(&self, now: Instant) -> Vec<DocKey> {
        let mut expired = Vec::new();
        let mut order = self.order.lock().await;
        loop {
            let Some(key) = order.get_index(0).cloned() else {
                break;
            };
            match self.expire_at.get(&key) {
                Some(at) if *at <= now => {
                    order.shift_remove(&key);
                    self.expire_at.remove(&key);
                    expired.push(key);
                },
                _ => break,
            }
        }
        expired
    }

    /// Whether the timer that walks this set may stop.
    pub async fn is_empty(&self) -> bool {
        self.order.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::ContentType;
    use crate::test_support::ReplaceContentType;
    use std::sync::Arc;

    fn content_type() -> ContentType {
        let ct = ContentType::new(Arc::new(ReplaceContentType));
        ct.register_schema("s1");
        ct
    }

    fn op(version: u32) -> Operation {
        Operation {
            key: format!("k{version}"),
            r#type: "note".into(),
            id: "d1".into(),
            version,
            schema: "s1".into(),
            data: Some(serde_json::json!({"v": version})),
            meta: None,
        }
    }

    #[test]
    fn served_version_tracks_last_operation() {
        let mut entry = CacheEntry::new(Snapshot::base("note", "d1", serde_json::json!({})));
        assert_eq!(entry.served_version(), 0);
        entry.push_operation(op(1));
        entry.push_operation(op(2));
        assert_eq!(entry.served_version(), 2);
    }

    #[test]
    fn snapshot_at_applies_up_to_requested_version() {
        let ct = content_type();
        let mut entry = CacheEntry::new(Snapshot::base("note", "d1", serde_json::json!({})));
        entry.push_operation(op(1));
        entry.push_operation(op(2));

        let snap = entry.snapshot_at(&ct, 1).unwrap().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.data, serde_json::json!({"v": 1}));
    }

    #[test]
    fn snapshot_at_out_of_range_is_none() {
        let ct = content_type();
        let entry = CacheEntry::new(Snapshot::base("note", "d1", serde_json::json!({})));
        assert!(entry.snapshot_at(&ct, 5).unwrap().is_none());
    }

    #[test]
    fn evict_folds_oldest_past_limit() {
        let ct = content_type();
        let mut entry = CacheEntry::new(Snapshot::base("note", "d1", serde_json::json!({})));
        entry.push_operation(op(1));
        entry.push_operation(op(2));
        entry.push_operation(op(3));
        entry.evict(&ct, Duration::from_secs(3600), 1).unwrap();
        assert_eq!(entry.snapshot.version, 2);
        assert_eq!(entry.operations().count(), 1);
    }

    #[tokio::test]
    async fn expiring_set_orders_by_insertion() {
        let set = ExpiringSet::new();
        set.schedule(DocKey::new("note", "a"), Duration::from_millis(0)).await;
        set.schedule(DocKey::new("note", "b"), Duration::from_millis(0)).await;
        let expired = set.sweep_expired(Instant::now() + Duration::from_millis(1)).await;
        assert_eq!(expired, vec![DocKey::new("note", "a"), DocKey::new("note", "b")]);
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn pin_removes_from_set() {
        let set = ExpiringSet::new();
        let key = DocKey::new("note", "a");
        set.schedule(key.clone(), Duration::from_millis(0)).await;
        set.pin(&key).await;
        assert!(set.is_empty().await);
    }
}
