//! The content backend: the per-document orchestrator that serializes
//! writes, caches recent state, and fans out operations to live subscribers
//! (spec §4.3).

mod cache;
mod config;
mod work_loop;

pub use cache::CacheEntry;
pub use config::{BackendConfig, BackoffConfig};

use crate::content_type::ContentTypeRegistry;
use crate::error::{EntityKind, Error, Result};
use crate::model::{DocKey, Operation, Snapshot, MAX_ENTITY_BYTES, MIN_VERSION};
use crate::pubsub::{operation_topic, PubSub, SubscriptionId};
use crate::store::Store;
use crate::stream::{OperationStream, StreamHandle};
use cache::ExpiringSet;
use dashmap::DashMap;
use indexmap::IndexSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Background tasks spawned by [`ContentBackend::spawn`]: the cache-sweep
/// timer and the stream-update work loop. Dropping this (or calling
/// [`BackgroundTasks::shutdown`]) stops both.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    sweep: tokio::task::JoinHandle<()>,
    work_loop: tokio::task::JoinHandle<()>,
}

impl BackgroundTasks {
    /// Signal both background tasks to stop and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.sweep.await;
        let _ = self.work_loop.await;
    }
}

/// The orchestrator described in spec §4.3: owns the cache map and the
/// stream registry for every `(type, id)` document it serves.
pub struct ContentBackend {
    config: BackendConfig,
    content_types: Arc<ContentTypeRegistry>,
    store: Arc<dyn Store>,
    pubsub: Arc<dyn PubSub>,
    cache: DashMap<DocKey, Arc<Mutex<CacheEntry>>>,
    expiring: ExpiringSet,
    streams: DashMap<DocKey, Mutex<Vec<Arc<StreamHandle>>>>,
    topic_subs: DashMap<DocKey, SubscriptionId>,
    dirty: Mutex<IndexSet<DocKey>>,
    notify: Notify,
    self_weak: std::sync::Weak<ContentBackend>,
}

impl ContentBackend {
    /// Build a backend over the given collaborators. Does not start any
    /// background task — call [`Self::spawn`] for that.
    pub fn new(
        content_types: Arc<ContentTypeRegistry>,
        store: Arc<dyn Store>,
        pubsub: Arc<dyn PubSub>,
        config: BackendConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            content_types,
            store,
            pubsub,
            cache: DashMap::new(),
            expiring: ExpiringSet::new(),
            streams: DashMap::new(),
            topic_subs: DashMap::new(),
            dirty: Mutex::new(IndexSet::new()),
            notify: Notify::new(),
            self_weak: weak.clone(),
        })
    }

    /// Start the 1-second cache-sweep timer and the stream-update work loop
    /// (spec §4.3.5, §4.3.6).
    pub fn spawn(self: &Arc<Self>) -> BackgroundTasks {
        let cancel = CancellationToken::new();

        let sweep_backend = self.clone();
        let sweep_cancel = cancel.clone();
        let sweep = tokio::spawn(async move { sweep_backend.run_sweep_timer(sweep_cancel).await });

        let work_backend = self.clone();
        let work_cancel = cancel.clone();
        let work_loop =
            tokio::spawn(async move { work_loop::run(work_backend, work_cancel).await });

        BackgroundTasks {
            cancel,
            sweep,
            work_loop,
        }
    }

    async fn run_sweep_timer(&self, cancel: CancellationToken) {
        loop {
            if self.expiring.is_empty().await {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {},
                    _ = cancel.cancelled() => return,
                }
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {},
                _ = cancel.cancelled() => return,
            }
            let expired = self.expiring.sweep_expired(std::time::Instant::now()).await;
            for key in expired {
                tracing::debug!(doc = %key, "evicting cache entry after ttl");
                self.cache.remove(&key);
            }
        }
    }

    // ---- submission pipeline (spec §4.3.1) ----------------------------

    /// Submit an operation for persistence and fan-out.
    pub async fn submit_operation(&self, op: Operation) -> Result<()> {
        if op.serialized_len() > MAX_ENTITY_BYTES {
            return Err(Error::too_large(EntityKind::Operation));
        }

        let doc_key = op.doc_key();
        let content_type = self
            .content_types
            .get(&doc_key.doc_type)
            .ok_or_else(|| Error::not_found(EntityKind::Operation, doc_key.doc_type.clone()))?;

        if !op.is_base() && !content_type.has_schema(&op.schema) {
            let schema = self
                .store
                .load_schema(&op.schema)
                .await?
                .ok_or_else(|| Error::not_found(EntityKind::Schema, op.schema.clone()))?;
            content_type.register_schema(schema.hash);
        }

        let entry_lock = self.entry_for(&doc_key).await;
        let mut entry = entry_lock.lock().await;

        let predecessor = if op.version >= 1 {
            self.load_snapshot_locked(&entry, &content_type, op.version - 1).await?
        } else {
            return Err(Error::assertion("cannot submit the implicit base operation"));
        };
        if op.version != predecessor.version + 1 {
            return Err(Error::assertion(format!(
                "submitOperation: op.version {} != predecessor.version {} + 1",
                op.version, predecessor.version
            )));
        }

        let next_snapshot = content_type.apply(&predecessor, &op)?;
        if next_snapshot.serialized_len() > MAX_ENTITY_BYTES {
            return Err(Error::too_large(EntityKind::Snapshot));
        }

        if let Err(err) = self.store.store_operation(&op).await {
            drop(entry);
            if err.is_already_exists() {
                tracing::warn!(doc = %doc_key, "submitOperation lost a race; scheduling stream refresh");
                self.schedule_stream_update(doc_key).await;
            }
            return Err(err);
        }

        entry.push_operation(op.clone());
        drop(entry);

        let topic = operation_topic(&doc_key.doc_type, &doc_key.id);
        if let Err(err) = self.pubsub.publish(&topic, serde_json::to_value(&op).unwrap_or_default()).await {
            tracing::warn!(doc = %doc_key, error = %err, "failed to publish operation");
        }
        self.push_to_open_streams(&doc_key, &op).await;

        if (self.config.should_store_snapshot)(&next_snapshot) {
            let store = self.store.clone();
            let snapshot = next_snapshot.clone();
            let doc_key = doc_key.clone();
            tokio::spawn(async move {
                match store.store_snapshot(&snapshot).await {
                    Ok(()) | Err(Error::AlreadyExists { .. }) => {},
                    Err(err) => tracing::warn!(doc = %doc_key, error = %err, "failed to store snapshot"),
                }
            });
        }

        self.touch(&doc_key).await;
        Ok(())
    }

    async fn push_to_open_streams(&self, doc_key: &DocKey, op: &Operation) {
        let Some(streams_entry) = self.streams.get(doc_key) else {
            return;
        };
        let candidates: Vec<Arc<StreamHandle>> = {
            let streams = streams_entry.lock().await;
            streams.iter().cloned().collect()
        };
        drop(streams_entry);

        let mut needs_backfill = false;
        for stream in &candidates {
            if stream.version_next().await == op.version {
                if let Err(err) = stream.push_operation(op.clone()).await {
                    tracing::warn!(doc = %doc_key, error = %err, "stream push failed");
                }
                if stream.is_closed() {
                    self.unregister_stream(doc_key, stream).await;
                }
            } else if stream.needs_update().await {
                needs_backfill = true;
            }
        }
        if needs_backfill {
            self.schedule_stream_update(doc_key.clone()).await;
        }
    }

    // ---- subscribe pipeline (spec §4.3.2) ------------------------------

    /// Open a stream for `(type, id)`'s operations in `[version_start,
    /// version_end)`.
    pub async fn stream_operations(
        &self,
        doc_type: &str,
        id: &str,
        version_start: u32,
        version_end: u32,
    ) -> Result<OperationStream> {
        let doc_key = DocKey::new(doc_type, id);
        let (handle, stream) = OperationStream::new(doc_type, id, version_start, version_end);
        let handle = Arc::new(handle);

        if version_start < version_end {
            let first_for_doc = {
                let mut streams = self
                    .streams
                    .entry(doc_key.clone())
                    .or_insert_with(|| Mutex::new(Vec::new()));
                let mut streams = streams.value_mut().lock().await;
                let first = streams.is_empty();
                streams.push(handle.clone());
                first
            };
            self.expiring.pin(&doc_key).await;

            if first_for_doc {
                let topic = operation_topic(doc_type, id);
                let callback_key = doc_key.clone();
                let weak = self.self_weak.clone();
                let sub_id = self
                    .pubsub
                    .subscribe(
                        &topic,
                        Arc::new(move |msg| {
                            let Some(backend) = weak.upgrade() else {
                                return;
                            };
                            let Ok(op) = serde_json::from_value::<Operation>(msg) else {
                                return;
                            };
                            let doc_key = callback_key.clone();
                            tokio::spawn(async move {
                                backend.push_to_open_streams(&doc_key, &op).await;
                            });
                        }),
                    )
                    .await?;
                self.topic_subs.insert(doc_key.clone(), sub_id);
            }

            self.schedule_stream_update(doc_key.clone()).await;

            // A consumer closing or dropping its `OperationStream` cancels
            // the same token this handle holds; watch for it so the
            // registry entry (and the pub/sub subscription, and the cache
            // pin) don't outlive every actual consumer (spec §4.3.2,
            // §4.3.5).
            let watch_key = doc_key.clone();
            let watch_handle = handle.clone();
            let weak = self.self_weak.clone();
            tokio::spawn(async move {
                watch_handle.cancelled().await;
                if let Some(backend) = weak.upgrade() {
                    backend.unregister_stream(&watch_key, &watch_handle).await;
                }
            });
        }

        Ok(stream)
    }

    /// Remove a closed stream from the registry, unsubscribing from the
    /// topic if it was the last one for this document.
    pub async fn unregister_stream(&self, doc_key: &DocKey, handle: &Arc<StreamHandle>) {
        let was_last = if let Some(streams) = self.streams.get(doc_key) {
            let mut streams = streams.lock().await;
            streams.retain(|s| !Arc::ptr_eq(s, handle));
            streams.is_empty()
        } else {
            false
        };
        if was_last {
            self.streams.remove(doc_key);
            if let Some((_, sub_id)) = self.topic_subs.remove(doc_key) {
                let topic = operation_topic(&doc_key.doc_type, &doc_key.id);
                let _ = self.pubsub.unsubscribe(&topic, sub_id).await;
            }
            self.touch(doc_key).await;
        }
    }

    // ---- snapshot load (spec §4.3.3) -----------------------------------

    /// Load the document's state at `v`.
    pub async fn load_snapshot(&self, doc_type: &str, id: &str, v: u32) -> Result<Snapshot> {
        let doc_key = DocKey::new(doc_type, id);
        let content_type = self
            .content_types
            .get(doc_type)
            .ok_or_else(|| Error::not_found(EntityKind::Snapshot, doc_type.to_string()))?;

        if let Some(entry_lock) = self.cache.get(&doc_key).map(|e| e.clone()) {
            let entry = entry_lock.lock().await;
            if entry.snapshot.version <= v {
                if let Some(snap) = entry.snapshot_at(&content_type, v)? {
                    if snap.version == v {
                        drop(entry);
                        self.touch(&doc_key).await;
                        return Ok(snap);
                    }
                }
            }
        }

        let mut snapshot = self.store.load_snapshot(doc_type, id, v).await?;
        if snapshot.version < v {
            let ops = self
                .load_operations(doc_type, id, snapshot.version + 1, v + 1)
                .await?;
            for op in &ops {
                snapshot = content_type.apply(&snapshot, op)?;
            }
        }

        self.cache
            .entry(doc_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(snapshot.clone()))));
        self.touch(&doc_key).await;
        Ok(snapshot)
    }

    async fn load_snapshot_locked(
        &self,
        entry: &CacheEntry,
        content_type: &crate::content_type::ContentType,
        v: u32,
    ) -> Result<Snapshot> {
        if entry.snapshot.version <= v {
            if let Some(snap) = entry.snapshot_at(content_type, v)? {
                if snap.version == v {
                    return Ok(snap);
                }
            }
        }
        let mut snapshot = self.store.load_snapshot(&entry.snapshot.r#type, &entry.snapshot.id, v).await?;
        if snapshot.version < v {
            let ops = self
                .load_operations(&entry.snapshot.r#type, &entry.snapshot.id, snapshot.version + 1, v + 1)
                .await?;
            for op in &ops {
                snapshot = content_type.apply(&snapshot, op)?;
            }
        }
        Ok(snapshot)
    }

    // ---- operation load (spec §4.3.4) ----------------------------------

    /// Load operations whose `version ∈ [start, end)`, in strictly
    /// increasing order.
    pub async fn load_operations(
        &self,
        doc_type: &str,
        id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Operation>> {
        let doc_key = DocKey::new(doc_type, id);
        let mut out = Vec::new();
        let mut next = start;
        if start == MIN_VERSION {
            out.push(Operation::base(doc_type, id));
            next = start + 1;
        }

        let entry_lock = self.cache.get(&doc_key).map(|e| e.clone());
        if let Some(entry_lock) = &entry_lock {
            let entry = entry_lock.lock().await;
            let first = entry.operations().next().map(|op| op.version);
            let last = entry.operations().last().map(|op| op.version);
            if let (Some(first), Some(last)) = (first, last) {
                if first <= next && last >= next {
                    for op in entry.operations() {
                        if op.version >= next && op.version < end {
                            out.push(op.clone());
                        }
                    }
                    next = (last + 1).min(end);
                    drop(entry);
                    self.touch(&doc_key).await;
                }
            }
        }

        if next < end {
            let content_type = self.content_types.get(doc_type);
            let fetched = self.store.load_operations(doc_type, id, next, end).await?;
            for op in &fetched {
                if op.is_base() {
                    continue;
                }
                if let Some(content_type) = &content_type {
                    if !content_type.has_schema(&op.schema) {
                        if let Some(schema) = self.store.load_schema(&op.schema).await? {
                            content_type.register_schema(schema.hash);
                        }
                    }
                }
            }

            if let Some(entry_lock) = &entry_lock {
                let mut entry = entry_lock.lock().await;
                if entry.served_version() + 1 == next {
                    for op in &fetched {
                        if !op.is_base() {
                            entry.push_operation(op.clone());
                        }
                    }
                }
            }

            out.extend(fetched.into_iter().filter(|op| !op.is_base()));
        }

        Ok(out)
    }

    // ---- cache discipline (spec §4.3.5) --------------------------------

    async fn entry_for(&self, doc_key: &DocKey) -> Arc<Mutex<CacheEntry>> {
        if let Some(entry) = self.cache.get(doc_key) {
            return entry.clone();
        }
        let snapshot = self
            .store
            .load_snapshot(&doc_key.doc_type, &doc_key.id, MIN_VERSION)
            .await
            .unwrap_or_else(|_| Snapshot::base(&doc_key.doc_type, &doc_key.id, serde_json::json!({})));
        self.cache
            .entry(doc_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(snapshot))))
            .clone()
    }

    async fn touch(&self, doc_key: &DocKey) {
        let pinned = self
            .streams
            .get(doc_key)
            .map(|s| !s.value().try_lock().map(|g| g.is_empty()).unwrap_or(false))
            .unwrap_or(false);
        if pinned {
            self.expiring.pin(doc_key).await;
        } else {
            self.expiring.schedule(doc_key.clone(), self.config.cache_ttl).await;
        }
        if let Some(entry_lock) = self.cache.get(doc_key) {
            if let (Some(content_type), Ok(mut entry)) =
                (self.content_types.get(&doc_key.doc_type), entry_lock.try_lock())
            {
                let _ = entry.evict(&content_type, self.config.cache_ttl, self.config.cache_limit);
            }
        }
    }

    /// Mark `doc_key` dirty for the stream-update work loop and wake it.
    pub async fn schedule_stream_update(&self, doc_key: DocKey) {
        self.dirty.lock().await.insert(doc_key);
        self.notify.notify_one();
    }

    /// The content type registry this backend validates and applies
    /// operations with.
    pub fn content_types(&self) -> &Arc<ContentTypeRegistry> {
        &self.content_types
    }

    /// The durable store collaborator.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
