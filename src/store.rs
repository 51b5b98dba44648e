//! The durable content store collaborator (spec §6 "Store interface").
//!
//! Out of scope per spec §1: this crate only defines the narrow interface
//! the backend consumes. A real deployment backs this with a database; see
//! [`crate::test_support::InMemoryStore`] for a reference implementation
//! used by this crate's own tests.

use crate::model::{Operation, Schema, Snapshot};
use crate::error::Result;
use async_trait::async_trait;

/// Durable persistence of schemas, operations, and snapshots.
///
/// Implementations must be linearizable per `(type, id)` (spec §5): two
/// concurrent `store_operation` calls for the same document racing on the
/// same `version` or `key` must have exactly one succeed and one fail with
/// [`crate::error::Error::AlreadyExists`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a schema. Implementations should treat `hash` as the
    /// primary key and fail with `AlreadyExists` on a colliding hash whose
    /// `(type, data)` differs — an identical re-store is the caller's
    /// problem to avoid via [`crate::facade::ServiceFacade::register_schema`]'s
    /// idempotent wrapper, not this trait's.
    async fn store_schema(&self, schema: &Schema) -> Result<()>;

    /// Load a schema by hash, or `None` if absent.
    async fn load_schema(&self, hash: &str) -> Result<Option<Schema>>;

    /// Persist an operation. Fails with `AlreadyExists` on a `key` or
    /// `(type, id, version)` collision (spec §6).
    async fn store_operation(&self, op: &Operation) -> Result<()>;

    /// Load operations for `(type, id)` whose `version ∈ [start, end)`, in
    /// strictly increasing order. Includes the synthetic base operation
    /// when `start == MIN_VERSION` (spec §6).
    async fn load_operations(
        &self,
        doc_type: &str,
        id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Operation>>;

    /// Persist a snapshot. Fails with `AlreadyExists` on a `(type, id,
    /// version)` collision.
    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Load the latest persisted snapshot with `version <= v`, or the base
    /// snapshot if none has been persisted (spec §6).
    async fn load_snapshot(&self, doc_type: &str, id: &str, v: u32) -> Result<Snapshot>;
}
