//! The migration target schema: a table of node/mark type declarations
//! (spec §4.5 "New-schema contract"), represented as "sum-of-record values
//! keyed by name" per spec §9's guidance for dynamic schema shapes.

use super::node::{Mark, MarkKind, Node, NodeKind, PlaceholderKind, MARK_PLACEHOLDER_NAME};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// An attribute's spec: just whether it has a default. Attributes without
/// a default are required (spec §4.5: "missing attributes with defaults
/// are filled in").
#[derive(Debug, Clone, Default)]
pub struct AttrSpec {
    pub default: Option<Value>,
}

impl AttrSpec {
    pub fn required() -> Self {
        Self { default: None }
    }

    pub fn with_default(value: Value) -> Self {
        Self { default: Some(value) }
    }
}

/// What child node types a node type's content allows.
#[derive(Debug, Clone)]
pub enum ContentExpr {
    /// No children permitted (the usual case for `isLeaf` types).
    None,
    /// Any child type is permitted.
    Any,
    /// Only children whose resulting type name is in this set.
    OneOf(HashSet<String>),
}

impl ContentExpr {
    fn allows(&self, child_name: &str) -> bool {
        match self {
            ContentExpr::None => false,
            ContentExpr::Any => true,
            ContentExpr::OneOf(names) => names.contains(child_name),
        }
    }
}

/// What mark types a node type allows.
#[derive(Debug, Clone)]
pub enum MarksExpr {
    None,
    Any,
    OneOf(HashSet<String>),
}

impl MarksExpr {
    fn allows(&self, mark_name: &str) -> bool {
        match self {
            MarksExpr::None => false,
            MarksExpr::Any => true,
            MarksExpr::OneOf(names) => names.contains(mark_name),
        }
    }
}

/// A node type declaration in the target schema.
#[derive(Debug, Clone)]
pub struct NodeTypeDef {
    pub name: String,
    pub is_leaf: bool,
    pub is_inline: bool,
    pub is_text: bool,
    pub attrs: IndexMap<String, AttrSpec>,
    pub content: ContentExpr,
    pub marks: MarksExpr,
}

impl NodeTypeDef {
    /// Whether this type's content expression only ever admits inline
    /// children — spec §4.5's `parent.inlineContent`, used to pick the
    /// placeholder bucket for a wrapped child.
    fn inline_content(&self, schema: &MigrationSchema) -> bool {
        match &self.content {
            ContentExpr::OneOf(names) if !names.is_empty() => {
                names.iter().all(|n| schema.node(n).map(|d| d.is_inline).unwrap_or(false))
            },
            _ => false,
        }
    }
}

/// A mark type declaration in the target schema.
#[derive(Debug, Clone, Default)]
pub struct MarkTypeDef {
    pub name: String,
    pub attrs: IndexMap<String, AttrSpec>,
    /// Names of other mark types this one excludes from co-occurring on
    /// the same node (spec §4.5 "mark exclusion"): once this mark
    /// survives conversion, any other surviving mark named here is
    /// dropped.
    pub excludes: HashSet<String>,
}

/// The migration target: node and mark type tables, plus whichever of the
/// five placeholders this schema opts into declaring.
#[derive(Debug, Clone, Default)]
pub struct MigrationSchema {
    nodes: IndexMap<String, NodeTypeDef>,
    marks: IndexMap<String, MarkTypeDef>,
}

impl MigrationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, def: NodeTypeDef) -> Self {
        self.nodes.insert(def.name.clone(), def);
        self
    }

    pub fn with_mark(mut self, def: MarkTypeDef) -> Self {
        self.marks.insert(def.name.clone(), def);
        self
    }

    pub fn node(&self, name: &str) -> Option<&NodeTypeDef> {
        self.nodes.get(name)
    }

    pub fn mark(&self, name: &str) -> Option<&MarkTypeDef> {
        self.marks.get(name)
    }

    /// The declared node-placeholder definition for `kind`, if this schema
    /// opted into it (spec §4.5: "may declare up to five placeholders").
    pub fn placeholder_node(&self, kind: PlaceholderKind) -> Option<&NodeTypeDef> {
        self.node(kind.name()).filter(|def| {
            def.is_leaf == kind.is_leaf() && def.is_inline == kind.is_inline()
        })
    }

    /// The declared mark-placeholder definition, if this schema opted
    /// into it.
    pub fn placeholder_mark(&self) -> Option<&MarkTypeDef> {
        self.mark(MARK_PLACEHOLDER_NAME)
    }

    pub(super) fn inline_content_of(&self, def: &NodeTypeDef) -> bool {
        def.inline_content(self)
    }

    pub(super) fn content_allows(&self, def: &NodeTypeDef, child_name: &str) -> bool {
        def.content.allows(child_name)
    }

    pub(super) fn marks_allow(&self, expr: &MarksExpr, mark_name: &str) -> bool {
        expr.allows(mark_name)
    }

    /// The set of mark names `mark_name` excludes from co-occurring on the
    /// same node, empty if `mark_name` isn't a declared mark type or
    /// declares no exclusions.
    pub(super) fn mark_excludes(&self, mark_name: &str) -> &HashSet<String> {
        static EMPTY: std::sync::OnceLock<HashSet<String>> = std::sync::OnceLock::new();
        self.mark(mark_name)
            .map(|def| &def.excludes)
            .unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }
}

/// Fill in defaults for missing attributes and drop everything not
/// declared in `specs` (spec §4.5 "preserve by name": "missing attributes
/// with defaults are filled in; extra attributes are dropped"). Returns
/// `None` if a required attribute (no default) is still missing.
pub(super) fn fill_and_trim_attrs(
    existing: &Map<String, Value>,
    specs: &IndexMap<String, AttrSpec>,
) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    for (name, spec) in specs {
        let value = existing.get(name).cloned().or_else(|| spec.default.clone())?;
        out.insert(name.clone(), value);
    }
    Some(out)
}

/// Build the `{name, attrs}` payload a placeholder node/mark embeds,
/// reusing an already-placeholder node/mark's payload verbatim rather than
/// double-wrapping it (spec §4.5's wrap step, applied uniformly whether
/// the thing being wrapped is itself already a placeholder or not).
pub(super) fn node_placeholder_payload(node: &Node) -> (String, Value) {
    if let Some((name, attrs)) = node.placeholder_payload() {
        (name, Value::Object(attrs))
    } else {
        (node.kind.name.clone(), Value::Object(node.attrs.clone()))
    }
}

pub(super) fn mark_placeholder_payload(mark: &Mark) -> (String, Value) {
    if mark.kind.is_placeholder() {
        let name = mark.attrs.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let attrs = mark.attrs.get("attrs").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        (name, attrs)
    } else {
        (mark.kind.name.clone(), Value::Object(mark.attrs.clone()))
    }
}

pub(super) fn placeholder_node_kind(def: &NodeTypeDef, original_is_text: bool) -> NodeKind {
    NodeKind::new(def.name.clone(), def.is_leaf, def.is_inline, original_is_text)
}

pub(super) fn placeholder_mark_kind() -> MarkKind {
    MarkKind::new(MARK_PLACEHOLDER_NAME)
}
