//! The data model: [`Schema`], [`Operation`], [`Snapshot`], and the
//! `(type, id)` document key they're all scoped by (spec §3).

mod doc_key;
mod limits;
mod meta;
mod operation;
mod schema;
mod snapshot;

pub use doc_key::DocKey;
pub use limits::{MAX_ENTITY_BYTES, MAX_VERSION, MIN_VERSION};
pub use meta::Meta;
pub use operation::Operation;
pub use schema::{fingerprint, Schema};
pub use snapshot::Snapshot;
