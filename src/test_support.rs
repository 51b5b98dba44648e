//! In-memory reference implementations of this crate's collaborator traits.
//!
//! Modeled on the teacher's `MockValidator` (`src/server/auth/mock.rs`): a
//! plain, non-`cfg(test)` public module, so both this crate's own unit tests
//! and external integration tests under `tests/` can build a
//! [`crate::backend::ContentBackend`] without standing up a real database,
//! message broker, or identity provider.
//!
//! **Never use these in production.** `InMemoryStore` and `InMemoryPubSub`
//! keep everything in process memory and `MockAuthSession` grants whatever
//! the test asked for.

use crate::auth::AuthSession;
use crate::content_type::ContentTypeStrategy;
use crate::error::{EntityKind, Error, Result};
use crate::model::{Operation, Schema, Snapshot};
use crate::pubsub::{Callback, PubSub, SubscriptionId};
use crate::store::Store;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A [`ContentTypeStrategy`] that treats `data` as an opaque object and
/// replaces the snapshot's content wholesale on every operation.
///
/// The simplest possible strategy, used wherever a test needs *a* content
/// type without caring about its fold semantics.
pub struct ReplaceContentType;

impl ContentTypeStrategy for ReplaceContentType {
    fn validate_schema(&self, schema: &Schema) -> Result<()> {
        if schema.data.is_object() {
            Ok(())
        } else {
            Err(Error::invalid(
                EntityKind::Schema,
                schema.hash.clone(),
                "schema data must be a JSON object",
            ))
        }
    }

    fn apply(&self, snapshot: &Snapshot, op: &Operation) -> Result<Snapshot> {
        Ok(Snapshot {
            r#type: snapshot.r#type.clone(),
            id: snapshot.id.clone(),
            version: op.version,
            schema: op.schema.clone(),
            data: op.data.clone().unwrap_or_else(|| snapshot.data.clone()),
            meta: op.meta.clone(),
        })
    }
}

/// An in-memory [`Store`], keyed the same way a real database would index
/// this data: schemas by hash, operations and snapshots by `(type, id)`
/// then by version.
#[derive(Default)]
pub struct InMemoryStore {
    schemas: DashMap<String, Schema>,
    operations: DashMap<(String, String), Mutex<BTreeMap<u32, Operation>>>,
    operation_keys: DashMap<(String, String), Mutex<std::collections::HashSet<String>>>,
    snapshots: DashMap<(String, String), Mutex<BTreeMap<u32, Snapshot>>>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn store_schema(&self, schema: &Schema) -> Result<()> {
        if let Some(existing) = self.schemas.get(&schema.hash) {
            if *existing == *schema {
                return Ok(());
            }
            return Err(Error::already_exists(
                EntityKind::Schema,
                schema.hash.clone(),
                "hash collision with differing data",
            ));
        }
        self.schemas.insert(schema.hash.clone(), schema.clone());
        Ok(())
    }

    async fn load_schema(&self, hash: &str) -> Result<Option<Schema>> {
        Ok(self.schemas.get(hash).map(|entry| entry.value().clone()))
    }

    async fn store_operation(&self, op: &Operation) -> Result<()> {
        let doc_key = (op.r#type.clone(), op.id.clone());
        let keys = self
            .operation_keys
            .entry(doc_key.clone())
            .or_insert_with(|| Mutex::new(std::collections::HashSet::new()));
        {
            let mut keys = keys.lock().unwrap();
            if !keys.insert(op.key.clone()) {
                return Err(Error::already_exists(
                    EntityKind::Operation,
                    op.key.clone(),
                    "duplicate operation key",
                ));
            }
        }

        let versions = self
            .operations
            .entry(doc_key)
            .or_insert_with(|| Mutex::new(BTreeMap::new()));
        let mut versions = versions.lock().unwrap();
        if versions.contains_key(&op.version) {
            return Err(Error::already_exists(
                EntityKind::Operation,
                op.version.to_string(),
                "version already recorded",
            ));
        }
        versions.insert(op.version, op.clone());
        Ok(())
    }

    async fn load_operations(
        &self,
        doc_type: &str,
        id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Operation>> {
        let mut out = Vec::new();
        if start == crate::model::MIN_VERSION {
            out.push(Operation::base(doc_type, id));
        }
        if let Some(versions) = self
            .operations
            .get(&(doc_type.to_string(), id.to_string()))
        {
            let versions = versions.lock().unwrap();
            out.extend(
                versions
                    .range(start.max(1)..end)
                    .map(|(_, op)| op.clone()),
            );
        }
        Ok(out)
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let doc_key = (snapshot.r#type.clone(), snapshot.id.clone());
        let versions = self
            .snapshots
            .entry(doc_key)
            .or_insert_with(|| Mutex::new(BTreeMap::new()));
        let mut versions = versions.lock().unwrap();
        if versions.contains_key(&snapshot.version) {
            return Err(Error::already_exists(
                EntityKind::Snapshot,
                snapshot.version.to_string(),
                "version already recorded",
            ));
        }
        versions.insert(snapshot.version, snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, doc_type: &str, id: &str, v: u32) -> Result<Snapshot> {
        if let Some(versions) = self.snapshots.get(&(doc_type.to_string(), id.to_string())) {
            let versions = versions.lock().unwrap();
            if let Some((_, snapshot)) = versions.range(..=v).next_back() {
                return Ok(snapshot.clone());
            }
        }
        Ok(Snapshot::base(doc_type, id, serde_json::json!({})))
    }
}

type Subscriber = (SubscriptionId, Callback);

/// An in-memory [`PubSub`] that delivers synchronously, in-process, to every
/// subscriber of a channel.
#[derive(Default)]
pub struct InMemoryPubSub {
    subscribers: DashMap<String, Mutex<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl InMemoryPubSub {
    /// A `PubSub` with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, message: serde_json::Value) -> Result<()> {
        if let Some(subs) = self.subscribers.get(channel) {
            for (_, callback) in subs.lock().unwrap().iter() {
                callback(message.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, callback: Callback) -> Result<SubscriptionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(channel.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap()
            .push((id, callback));
        Ok(id)
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<()> {
        if let Some(subs) = self.subscribers.get(channel) {
            subs.lock().unwrap().retain(|(sub_id, _)| *sub_id != id);
        }
        Ok(())
    }
}

/// A configurable mock [`AuthSession`].
///
/// Grants every permission by default; use the builder methods to exercise
/// the service facade's rejection paths.
#[derive(Debug, Clone)]
pub struct MockAuthSession {
    active: bool,
    user_id: String,
    session_id: String,
    may_read: bool,
    may_write: bool,
}

impl MockAuthSession {
    /// An active session for `user_id` that may read and write anything.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            active: true,
            user_id: user_id.into(),
            session_id: "mock-session".to_string(),
            may_read: true,
            may_write: true,
        }
    }

    /// Set the session id (stamped into `meta.session`).
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Make [`AuthSession::active`] return `false`.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Make [`AuthSession::may_read_content`] deny.
    pub fn deny_read(mut self) -> Self {
        self.may_read = false;
        self
    }

    /// Make [`AuthSession::may_write_content`] deny.
    pub fn deny_write(mut self) -> Self {
        self.may_write = false;
        self
    }
}

#[async_trait]
impl AuthSession for MockAuthSession {
    fn active(&self) -> bool {
        self.active
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn may_read_content(&self, _doc_type: &str, _id: &str) -> Result<bool> {
        Ok(self.may_read)
    }

    async fn may_write_content(&self, _doc_type: &str, _id: &str) -> Result<bool> {
        Ok(self.may_write)
    }
}
