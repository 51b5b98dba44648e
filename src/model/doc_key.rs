//! `(type, id)` document identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a document: its content type plus its type-scoped id.
///
/// This is the key the [`crate::backend::ContentBackend`] uses for its cache
/// map and stream registry (spec §3 "Document Cache Entry", §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocKey {
    /// Content type name (e.g. `"note"`, `"wiki-page"`).
    pub doc_type: String,
    /// Type-scoped document id.
    pub id: String,
}

impl DocKey {
    /// Combine a type and id into a document key (spec §4.3: `combine(type, id)`).
    pub fn new(doc_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(DocKey::new("note", "d1"));
        assert!(set.contains(&DocKey::new("note", "d1")));
        assert!(!set.contains(&DocKey::new("note", "d2")));
    }
}
