//! The content type registry: per-document-type schema validation, schema
//! caching, and `apply` (spec §4.2).

use crate::error::{EntityKind, Error, Result};
use crate::model::{Operation, Schema, Snapshot};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

/// The domain-specific strategy a document type supplies: how to validate
/// its schemas and how to fold an operation into a snapshot.
///
/// This is intentionally the only part of the content type contract that's
/// domain-specific; schema caching (spec: "a per-type in-memory cache of
/// validated schemas") is generic behavior the registry provides around any
/// strategy, so it lives on [`ContentType`] instead of this trait.
pub trait ContentTypeStrategy: Send + Sync {
    /// Validate a schema's `data`, returning an error describing why it's
    /// invalid. Called before persistence.
    fn validate_schema(&self, schema: &Schema) -> Result<()>;

    /// Deterministic, side-effect-free fold of an operation into a
    /// snapshot. Preconditions (`op.version == snapshot.version + 1` and
    /// the schema having been registered) are checked by [`ContentType::apply`]
    /// before this is called.
    fn apply(&self, snapshot: &Snapshot, op: &Operation) -> Result<Snapshot>;
}

/// A document type: a [`ContentTypeStrategy`] plus its schema cache.
pub struct ContentType {
    strategy: Arc<dyn ContentTypeStrategy>,
    validated_schemas: DashSet<String>,
}

impl ContentType {
    /// Wrap a strategy as a content type with an empty schema cache.
    pub fn new(strategy: Arc<dyn ContentTypeStrategy>) -> Self {
        Self {
            strategy,
            validated_schemas: DashSet::new(),
        }
    }

    /// Validate a schema's `data` against this type's rules, throwing on
    /// invalid (spec §4.2). Does not register it — call [`Self::register_schema`]
    /// afterwards.
    pub fn validate_schema(&self, schema: &Schema) -> Result<()> {
        self.strategy.validate_schema(schema)
    }

    /// Add a hash to this type's in-memory cache of validated schemas.
    /// Idempotent: registering the same hash twice is a no-op.
    pub fn register_schema(&self, hash: impl Into<String>) {
        self.validated_schemas.insert(hash.into());
    }

    /// Whether a schema hash has been registered with this type.
    pub fn has_schema(&self, hash: &str) -> bool {
        self.validated_schemas.contains(hash)
    }

    /// Fold an operation into a snapshot, checking preconditions first.
    pub fn apply(&self, snapshot: &Snapshot, op: &Operation) -> Result<Snapshot> {
        if op.version != snapshot.version + 1 {
            return Err(Error::assertion(format!(
                "apply precondition violated: op.version {} != snapshot.version {} + 1",
                op.version, snapshot.version
            )));
        }
        if !op.is_base() && !self.has_schema(&op.schema) {
            return Err(Error::not_found(EntityKind::Schema, op.schema.clone()));
        }
        self.strategy.apply(snapshot, op)
    }
}

/// A mapping `type -> ContentType` (spec §4.2).
#[derive(Default)]
pub struct ContentTypeRegistry {
    types: DashMap<String, Arc<ContentType>>,
}

impl ContentTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under a content type name.
    pub fn register(&self, doc_type: impl Into<String>, strategy: Arc<dyn ContentTypeStrategy>) {
        self.types
            .insert(doc_type.into(), Arc::new(ContentType::new(strategy)));
    }

    /// Look up the content type for a document type name.
    pub fn get(&self, doc_type: &str) -> Option<Arc<ContentType>> {
        self.types.get(doc_type).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ReplaceContentType;
    use crate::model::MIN_VERSION;

    fn schema() -> Schema {
        Schema::new("note", serde_json::json!({}), None)
    }

    #[test]
    fn apply_rejects_out_of_sequence_version() {
        let ct = ContentType::new(Arc::new(ReplaceContentType));
        let schema = schema();
        ct.register_schema(schema.hash.clone());

        let snap = Snapshot::base("note", "d1", serde_json::json!({}));
        let op = Operation {
            key: "k".into(),
            r#type: "note".into(),
            id: "d1".into(),
            version: 5, // should be MIN_VERSION + 1
            schema: schema.hash.clone(),
            data: Some(serde_json::json!({"text": "hi"})),
            meta: None,
        };

        let err = ct.apply(&snap, &op).unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
    }

    #[test]
    fn apply_rejects_unregistered_schema() {
        let ct = ContentType::new(Arc::new(ReplaceContentType));
        let snap = Snapshot::base("note", "d1", serde_json::json!({}));
        let op = Operation {
            key: "k".into(),
            r#type: "note".into(),
            id: "d1".into(),
            version: MIN_VERSION + 1,
            schema: "never-registered".into(),
            data: Some(serde_json::json!({"text": "hi"})),
            meta: None,
        };

        let err = ct.apply(&snap, &op).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn registry_round_trip() {
        let registry = ContentTypeRegistry::new();
        registry.register("note", Arc::new(ReplaceContentType));
        assert!(registry.get("note").is_some());
        assert!(registry.get("missing").is_none());
    }
}
