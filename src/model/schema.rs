//! The [`Schema`] entity (spec §3).

use super::meta::Meta;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content-addressed, immutable schema declaration.
///
/// `hash` is a fingerprint of `(type, data)` — two schemas with the same
/// type and data always have the same hash, and the store treats `hash` as
/// the primary key (spec §3: "Created by client; validated; persisted
/// exactly once per hash").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Content fingerprint of `(type, data)`.
    pub hash: String,
    /// Content type this schema belongs to.
    pub r#type: String,
    /// Language-neutral spec describing allowed node/mark kinds.
    pub data: serde_json::Value,
    /// Optional attribution/timestamp metadata.
    pub meta: Option<Meta>,
}

impl Schema {
    /// Build a schema, computing its hash from `type` and `data`.
    ///
    /// Mirrors the teacher's preference for content-addressed artifacts
    /// (the registry server hashes published package tarballs with the same
    /// `sha2` dependency this crate reuses).
    pub fn new(doc_type: impl Into<String>, data: serde_json::Value, meta: Option<Meta>) -> Self {
        let r#type = doc_type.into();
        let hash = fingerprint(&r#type, &data);
        Self {
            hash,
            r#type,
            data,
            meta,
        }
    }

    /// Recompute the fingerprint and compare against the stored `hash`.
    ///
    /// Spec invariant: `hash == fingerprint(type, data)`.
    pub fn has_valid_hash(&self) -> bool {
        self.hash == fingerprint(&self.r#type, &self.data)
    }

    /// Serialized size in bytes, for the 1 MiB ceiling check.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

/// Content fingerprint of `(type, data)`.
///
/// `data` is serialized with `serde_json`'s default (insertion-order)
/// formatting; callers that need canonical hashing across languages should
/// normalize `data` before constructing a [`Schema`] — the fingerprint
/// function itself is deterministic for a given in-memory `Value`.
pub fn fingerprint(doc_type: &str, data: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_type.as_bytes());
    hasher.update([0u8]); // separator, avoids type/data concatenation collisions
    hasher.update(serde_json::to_vec(data).unwrap_or_default());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_schema_has_valid_hash() {
        let schema = Schema::new("note", serde_json::json!({"nodes": {}}), None);
        assert!(schema.has_valid_hash());
    }

    #[test]
    fn different_types_hash_differently_for_same_data() {
        let data = serde_json::json!({"nodes": {}});
        let a = Schema::new("note", data.clone(), None);
        let b = Schema::new("wiki", data, None);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn tampered_hash_fails_validation() {
        let mut schema = Schema::new("note", serde_json::json!({}), None);
        schema.hash = "not-the-real-hash".to_string();
        assert!(!schema.has_valid_hash());
    }
}
