//! The schema migration engine (spec §4.5) and structural-equivalence
//! checker (spec §4.6): pure, deterministic, and independent of the
//! content backend — nothing here touches the store, pub/sub, or caches.

mod convert;
mod node;
mod schema;
mod shape;

pub use convert::change_schema;
pub use node::{Mark, MarkKind, Node, NodeKind, PlaceholderKind, MARK_PLACEHOLDER_NAME};
pub use schema::{AttrSpec, ContentExpr, MarkTypeDef, MarksExpr, MigrationSchema, NodeTypeDef};
pub use shape::{node_size, same_shape};
