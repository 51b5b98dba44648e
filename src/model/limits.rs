//! Document-model limits (spec §3 "Limits").

/// The synthetic base version that exists implicitly for every document.
pub const MIN_VERSION: u32 = 0;

/// The highest version a document can reach.
pub const MAX_VERSION: u32 = u32::MAX;

/// Serialized-size ceiling shared by schemas, operations, and snapshots.
pub const MAX_ENTITY_BYTES: usize = 1024 * 1024;
