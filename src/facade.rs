//! The service facade: the thin, stateless shell that validates arguments,
//! stamps `meta`, and enforces authorization before delegating to the
//! [`ContentBackend`] (spec §4.4).

use crate::auth::AuthSession;
use crate::backend::ContentBackend;
use crate::error::{EntityKind, Error, Result};
use crate::model::{Meta, Operation, Schema, Snapshot, MAX_ENTITY_BYTES};
use crate::stream::OperationStream;
use chrono::Utc;
use std::sync::Arc;

/// The RPC surface (spec §6): `registerSchema`, `getSchema`, `getSnapshot`,
/// `submitOperation`, `streamOperations`. Stateless — every method takes the
/// caller's [`AuthSession`] as an argument rather than holding one, so a
/// single facade instance serves arbitrarily many concurrent callers
/// (spec §5: "safe for arbitrary parallelism").
pub struct ServiceFacade {
    backend: Arc<ContentBackend>,
}

impl ServiceFacade {
    /// Wrap a backend as a facade.
    pub fn new(backend: Arc<ContentBackend>) -> Self {
        Self { backend }
    }

    fn require_active(auth: &dyn AuthSession) -> Result<()> {
        if auth.active() {
            Ok(())
        } else {
            Err(Error::auth("session is not active"))
        }
    }

    /// Register a schema. Idempotent: an `AlreadyExists` from an identical
    /// re-registration is swallowed (spec §6).
    pub async fn register_schema(
        &self,
        auth: &dyn AuthSession,
        doc_type: String,
        data: serde_json::Value,
    ) -> Result<Schema> {
        Self::require_active(auth)?;

        let mut schema = Schema::new(doc_type.clone(), data, Some(Meta::new()));
        stamp(&mut schema.meta, auth);

        if schema.serialized_len() > MAX_ENTITY_BYTES {
            return Err(Error::too_large(EntityKind::Schema));
        }

        let content_type = self
            .backend
            .content_types()
            .get(&doc_type)
            .ok_or_else(|| Error::not_found(EntityKind::Schema, doc_type.clone()))?;
        content_type.validate_schema(&schema)?;

        match self.backend.store().store_schema(&schema).await {
            Ok(()) => {},
            Err(err) if err.is_already_exists() => {},
            Err(err) => return Err(err),
        }
        content_type.register_schema(schema.hash.clone());
        Ok(schema)
    }

    /// Fetch a schema by hash, or `None` if unknown.
    pub async fn get_schema(&self, auth: &dyn AuthSession, hash: String) -> Result<Option<Schema>> {
        Self::require_active(auth)?;
        self.backend.store().load_schema(&hash).await
    }

    /// Fetch the document's state at `version`. Requires `mayReadContent`.
    pub async fn get_snapshot(
        &self,
        auth: &dyn AuthSession,
        doc_type: String,
        id: String,
        version: u32,
    ) -> Result<Snapshot> {
        Self::require_active(auth)?;
        if !auth.may_read_content(&doc_type, &id).await? {
            return Err(Error::auth("not permitted to read this document"));
        }
        self.backend.load_snapshot(&doc_type, &id, version).await
    }

    /// Submit an operation. Requires `mayWriteContent`; stamps
    /// `meta.{session,user,time}` (spec §4.4, §6).
    pub async fn submit_operation(
        &self,
        auth: &dyn AuthSession,
        doc_type: String,
        id: String,
        key: String,
        version: u32,
        schema: String,
        data: serde_json::Value,
    ) -> Result<()> {
        Self::require_active(auth)?;
        if !auth.may_write_content(&doc_type, &id).await? {
            return Err(Error::auth("not permitted to write this document"));
        }

        let mut meta = Some(Meta::new());
        stamp(&mut meta, auth);

        let op = Operation {
            key,
            r#type: doc_type,
            id,
            version,
            schema,
            data: Some(data),
            meta,
        };
        self.backend.submit_operation(op).await
    }

    /// Open a stream of operations on `(type, id)` for `[version_start,
    /// version_end)`. Requires `mayReadContent`.
    pub async fn stream_operations(
        &self,
        auth: &dyn AuthSession,
        doc_type: String,
        id: String,
        version_start: u32,
        version_end: u32,
    ) -> Result<OperationStream> {
        Self::require_active(auth)?;
        if !auth.may_read_content(&doc_type, &id).await? {
            return Err(Error::auth("not permitted to read this document"));
        }
        // `u32` already confines both arguments to `[minVersion, maxVersion]`
        // (spec §6); the only remaining argument-shape check is ordering.
        if version_start > version_end {
            return Err(Error::invalid(
                EntityKind::Operation,
                doc_type.clone(),
                "versionStart must not exceed versionEnd",
            ));
        }
        self.backend
            .stream_operations(&doc_type, &id, version_start, version_end)
            .await
    }
}

/// Override `meta.session`, `meta.user`, `meta.time`, preserving every other
/// key the caller supplied (spec §4.4).
fn stamp(meta: &mut Option<Meta>, auth: &dyn AuthSession) {
    let entry = meta.get_or_insert_with(Meta::new);
    entry.stamp(auth.session_id(), auth.user_id(), &Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::content_type::ContentTypeRegistry;
    use crate::pubsub::PubSub;
    use crate::store::Store;
    use crate::test_support::{InMemoryPubSub, InMemoryStore, MockAuthSession, ReplaceContentType};
    use futures::StreamExt;

    fn facade() -> (ServiceFacade, crate::backend::BackgroundTasks) {
        let registry = Arc::new(ContentTypeRegistry::new());
        registry.register("note", Arc::new(ReplaceContentType));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let pubsub: Arc<dyn PubSub> = Arc::new(InMemoryPubSub::new());
        let backend = ContentBackend::new(registry, store, pubsub, BackendConfig::default());
        let tasks = backend.spawn();
        (ServiceFacade::new(backend), tasks)
    }

    #[tokio::test]
    async fn rejects_inactive_session() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1").inactive();
        let err = facade
            .get_snapshot(&auth, "note".into(), "d1".into(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn register_schema_is_idempotent() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1");
        let data = serde_json::json!({"nodes": {}});
        let first = facade
            .register_schema(&auth, "note".into(), data.clone())
            .await
            .unwrap();
        let second = facade
            .register_schema(&auth, "note".into(), data)
            .await
            .unwrap();
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn submit_operation_stamps_meta() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1").with_session_id("sess-1");
        let schema = facade
            .register_schema(&auth, "note".into(), serde_json::json!({}))
            .await
            .unwrap();

        facade
            .submit_operation(
                &auth,
                "note".into(),
                "d1".into(),
                "k1".into(),
                1,
                schema.hash,
                serde_json::json!({"text": "hi"}),
            )
            .await
            .unwrap();

        let snap = facade
            .get_snapshot(&auth, "note".into(), "d1".into(), 1)
            .await
            .unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.meta.as_ref().and_then(|m| m.session()), Some("sess-1"));
        assert_eq!(snap.meta.as_ref().and_then(|m| m.user()), Some("u1"));
    }

    #[tokio::test]
    async fn deny_write_rejects_submission() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1").deny_write();
        let err = facade
            .submit_operation(
                &auth,
                "note".into(),
                "d1".into(),
                "k1".into(),
                1,
                "schema".into(),
                serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn oversized_operation_is_rejected_with_entity_too_large() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1");
        let schema = facade
            .register_schema(&auth, "note".into(), serde_json::json!({}))
            .await
            .unwrap();

        let oversized = serde_json::json!({"text": "x".repeat(2 * 1024 * 1024)});
        let err = facade
            .submit_operation(
                &auth,
                "note".into(),
                "d1".into(),
                "k1".into(),
                1,
                schema.hash,
                oversized,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityTooLarge(EntityKind::Operation)));
    }

    #[tokio::test]
    async fn stream_operations_rejects_inverted_range() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1");
        let err = facade
            .stream_operations(&auth, "note".into(), "d1".into(), 5, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntity { .. }));
    }

    #[tokio::test]
    async fn submit_then_stream_backfill() {
        let (facade, _tasks) = facade();
        let auth = MockAuthSession::new("u1");
        let schema = facade
            .register_schema(&auth, "note".into(), serde_json::json!({}))
            .await
            .unwrap();

        for v in 1..=5u32 {
            facade
                .submit_operation(
                    &auth,
                    "note".into(),
                    "d1".into(),
                    format!("k{v}"),
                    v,
                    schema.hash.clone(),
                    serde_json::json!({"v": v}),
                )
                .await
                .unwrap();
        }

        let mut stream = facade
            .stream_operations(&auth, "note".into(), "d1".into(), 1, 6)
            .await
            .unwrap();

        for expected in 1..=5u32 {
            let op = stream.next().await.unwrap().unwrap();
            assert_eq!(op.version, expected);
        }
        assert!(stream.next().await.is_none());
    }
}
