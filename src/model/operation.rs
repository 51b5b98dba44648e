//! The [`Operation`] entity (spec §3).

use super::doc_key::DocKey;
use super::limits::MIN_VERSION;
use super::meta::Meta;
use serde::{Deserialize, Serialize};

/// A single, immutable change to a document's content.
///
/// `version == MIN_VERSION` is the implicit base operation that exists for
/// every document and is never stored (spec §3): `key` is empty, `schema`
/// is empty, and `data`/`meta` are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Client-assigned identity, unique per `(type, id, user)`. Empty for
    /// the synthetic base operation.
    pub key: String,
    /// Content type.
    pub r#type: String,
    /// Document id.
    pub id: String,
    /// Position in the document's history, `predecessor.version + 1`.
    pub version: u32,
    /// Hash of the [`crate::model::Schema`] this operation was authored
    /// against. Empty for the synthetic base operation.
    pub schema: String,
    /// The action payload. `None` for the synthetic base operation.
    pub data: Option<serde_json::Value>,
    /// Attribution/timestamp metadata. `None` for the synthetic base operation.
    pub meta: Option<Meta>,
}

impl Operation {
    /// The synthetic base operation for a document, which is never stored
    /// but is returned by loads that touch `version == MIN_VERSION`.
    pub fn base(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: String::new(),
            r#type: doc_type.into(),
            id: id.into(),
            version: MIN_VERSION,
            schema: String::new(),
            data: None,
            meta: None,
        }
    }

    /// True if this is the synthetic base operation.
    pub fn is_base(&self) -> bool {
        self.version == MIN_VERSION
    }

    /// This operation's document key.
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
    fn base_operation_has_empty_key_and_schema() {
        let base = Operation::base("note", "d1");
        assert!(base.is_base());
        assert_eq!(base.key, "");
        assert_eq!(base.schema, "");
        assert!(base.data.is_none());
        assert!(base.meta.is_none());
    }

    #[test]
    fn non_base_operation_is_not_base() {
        let op = Operation {
            key: "k1".into(),
            r#type: "note".into(),
            id: "d1".into(),
            version: 1,
            schema: "abc".into(),
            data: Some(serde_json::json!({})),
            meta: None,
        };
        assert!(!op.is_base());
    }
}
