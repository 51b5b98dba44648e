//! The dynamic document tree the migration engine operates on (spec §4.5
//! "Input model").
//!
//! Unlike [`crate::model`]'s `Schema`/`Operation`/`Snapshot` (server-side
//! persistence entities), this tree is a runtime value: schemas describe
//! node/mark *kinds*, but the tree itself carries its own `isLeaf`,
//! `isInline`, `isText` flags directly on each node rather than through a
//! lookup into whatever schema produced it (spec §9 "dynamic node shapes").

use serde_json::{Map, Value};

/// The four node-placeholder buckets a schema may declare, plus the one
/// mark placeholder, named by the fixed, schema-independent convention
/// spec §4.5 gives them. A node or mark produced by an earlier migration
/// carries one of these names whenever it represents content the target
/// schema of that earlier run couldn't express natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    BlockBranch,
    BlockLeaf,
    InlineBranch,
    InlineLeaf,
}

impl PlaceholderKind {
    pub const ALL: [PlaceholderKind; 4] = [
        PlaceholderKind::BlockBranch,
        PlaceholderKind::BlockLeaf,
        PlaceholderKind::InlineBranch,
        PlaceholderKind::InlineLeaf,
    ];

    /// The canonical node-type name this placeholder kind is declared
    /// under in a schema.
    pub fn name(self) -> &'static str {
        match self {
            PlaceholderKind::BlockBranch => "blockBranch",
            PlaceholderKind::BlockLeaf => "blockLeaf",
            PlaceholderKind::InlineBranch => "inlineBranch",
            PlaceholderKind::InlineLeaf => "inlineLeaf",
        }
    }

    /// Select a kind from `(inline, leaf)`, per spec §4.5 "Placeholder
    /// kind selection": `(parent.inlineContent ? inline : block) ×
    /// (node.isLeaf ? leaf : branch)`.
    pub fn select(inline: bool, leaf: bool) -> Self {
        match (inline, leaf) {
            (true, true) => PlaceholderKind::InlineLeaf,
            (true, false) => PlaceholderKind::InlineBranch,
            (false, true) => PlaceholderKind::BlockLeaf,
            (false, false) => PlaceholderKind::BlockBranch,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub(crate) fn is_leaf(self) -> bool {
        matches!(self, PlaceholderKind::BlockLeaf | PlaceholderKind::InlineLeaf)
    }

    pub(crate) fn is_inline(self) -> bool {
        matches!(self, PlaceholderKind::InlineBranch | PlaceholderKind::InlineLeaf)
    }
}

/// The canonical name the single mark placeholder is declared under.
pub const MARK_PLACEHOLDER_NAME: &str = "mark";

/// A node's type identity: a name plus the three kind flags spec §4.5
/// says every node carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeKind {
    pub name: String,
    pub is_leaf: bool,
    pub is_inline: bool,
    pub is_text: bool,
}

impl NodeKind {
    pub fn new(name: impl Into<String>, is_leaf: bool, is_inline: bool, is_text: bool) -> Self {
        Self {
            name: name.into(),
            is_leaf,
            is_inline,
            is_text,
        }
    }

    /// If this kind's name is one of the four canonical node-placeholder
    /// names, the placeholder bucket it belongs to.
    pub fn placeholder_kind(&self) -> Option<PlaceholderKind> {
        PlaceholderKind::from_name(&self.name)
    }
}

/// A mark's type identity: just a name (marks have no leaf/inline/text
/// distinction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkKind {
    pub name: String,
}

impl MarkKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == MARK_PLACEHOLDER_NAME
    }
}

/// A single mark attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub kind: MarkKind,
    pub attrs: Map<String, Value>,
}

/// A node in the dynamic document tree (spec §4.5 "Input model").
///
/// `text` is populated only for `kind.is_text` nodes; `children` is always
/// empty for `kind.is_leaf` nodes (text nodes are leaves).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub attrs: Map<String, Value>,
    pub children: Vec<Node>,
    pub marks: Vec<Mark>,
    pub text: Option<String>,
}

impl Node {
    /// Construct a non-leaf (branch) node.
    pub fn branch(
        name: impl Into<String>,
        is_inline: bool,
        attrs: Map<String, Value>,
        children: Vec<Node>,
        marks: Vec<Mark>,
    ) -> Self {
        Self {
            kind: NodeKind::new(name, false, is_inline, false),
            attrs,
            children,
            marks,
            text: None,
        }
    }

    /// Construct a leaf node (not text).
    pub fn leaf(name: impl Into<String>, is_inline: bool, attrs: Map<String, Value>, marks: Vec<Mark>) -> Self {
        Self {
            kind: NodeKind::new(name, true, is_inline, false),
            attrs,
            children: Vec::new(),
            marks,
            text: None,
        }
    }

    /// Construct a text node.
    pub fn text(name: impl Into<String>, text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self {
            kind: NodeKind::new(name, true, true, true),
            attrs: Map::new(),
            children: Vec::new(),
            marks,
            text: Some(text.into()),
        }
    }

    /// Whether this node's kind name is one of the four canonical
    /// node-placeholder names.
    pub fn is_placeholder(&self) -> bool {
        self.kind.placeholder_kind().is_some()
    }

    /// Unpack a placeholder node's embedded `{name, attrs}` payload
    /// (spec §4.5: "each placeholder's attribute schema is exactly
    /// `{name: string, attrs: object}`"). Returns `None` if this node
    /// isn't a well-formed placeholder.
    pub fn placeholder_payload(&self) -> Option<(String, Map<String, Value>)> {
        let name = self.attrs.get("name")?.as_str()?.to_string();
        let attrs = self.attrs.get("attrs")?.as_object()?.clone();
        Some((name, attrs))
    }
}
