//! The [`Snapshot`] entity (spec §3).

use super::doc_key::DocKey;
use super::limits::MIN_VERSION;
use super::meta::Meta;
use serde::{Deserialize, Serialize};

/// A derived point-in-time document state: `apply(snapshot_v, op_{v+1}) ==
/// snapshot_{v+1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Content type.
    pub r#type: String,
    /// Document id.
    pub id: String,
    /// The version this snapshot represents.
    pub version: u32,
    /// Hash of the schema the document was on at this version.
    pub schema: String,
    /// The document's content at this version.
    pub data: serde_json::Value,
    /// Attribution/timestamp metadata of the operation that produced this
    /// snapshot, if any.
    pub meta: Option<Meta>,
}

impl Snapshot {
    /// The implicit base snapshot, which exists at `version == MIN_VERSION`
    /// for every document even if never persisted.
    pub fn base(doc_type: impl Into<String>, id: impl Into<String>, empty_data: serde_json::Value) -> Self {
        Self {
            r#type: doc_type.into(),
            id: id.into(),
            version: MIN_VERSION,
            schema: String::new(),
            data: empty_data,
            meta: None,
        }
    }

    /// This snapshot's document key.
    pub fn doc_key(&self) -> DocKey {
        DocKey::new(self.r#type.clone(), self.id.clone())
    }

    /// Serialized size in bytes, for the 1 MiB ceiling check.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_snapshot_has_min_version() {
        let snap = Snapshot::base("note", "d1", serde_json::json!({}));
        assert_eq!(snap.version, MIN_VERSION);
        assert_eq!(snap.schema, "");
    }
}
