//! `changeSchema`: the pure, deterministic per-node conversion algorithm
//! (spec §4.5).

use super::node::{Mark, MarkKind, Node, NodeKind, PlaceholderKind};
use super::schema::{fill_and_trim_attrs, mark_placeholder_payload, node_placeholder_payload, placeholder_mark_kind, placeholder_node_kind, MarkTypeDef, MarksExpr, MigrationSchema, NodeTypeDef};
use super::shape::same_shape;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Context about where a node sits in the *output* tree, carried down
/// during recursion.
struct ParentCtx {
    /// Whether the output parent's content only admits inline children
    /// (spec §4.5 `parent.inlineContent`), used to pick a wrapped child's
    /// placeholder bucket.
    inline_content: bool,
    /// Set when the output parent is itself a placeholder branch: every
    /// descendant must also become a placeholder (spec §4.5 "context
    /// rule").
    forced: Option<PlaceholderKind>,
}

/// Migrate `node` to `new_schema`, or `Ok(None)` if no representation
/// satisfies the schema's top-level validity. `Err` only on the
/// post-condition assertion failing — a programmer error, per spec §4.5
/// "if this post-condition fails, the engine signals a programmer error".
pub fn change_schema(node: &Node, new_schema: &MigrationSchema) -> Result<Option<Node>> {
    let Some(converted) = migrate_node(node, new_schema, None) else {
        return Ok(None);
    };
    if !same_shape(node, &converted) {
        return Err(Error::assertion(
            "schema migration post-condition failed: output shape does not match input shape",
        ));
    }
    Ok(Some(converted))
}

fn migrate_node(node: &Node, schema: &MigrationSchema, parent: Option<&ParentCtx>) -> Option<Node> {
    let forced = parent.and_then(|p| p.forced);
    if forced.is_some() {
        // Every descendant of a placeholder branch must itself end up a
        // placeholder (spec §4.5 "context rule") — `wrap_node` already
        // reuses an existing placeholder's payload rather than
        // double-wrapping it.
        return wrap_node(node, schema, parent);
    }

    if node.kind.placeholder_kind().is_some() {
        if let Some(restored) = restore_node(node, schema) {
            return Some(restored);
        }
    }
    if let Some(preserved) = preserve_node(node, schema) {
        return Some(preserved);
    }
    if !node.is_placeholder() {
        if let Some(wrapped) = wrap_node(node, schema, parent) {
            return Some(wrapped);
        }
    }
    None
}

/// Step 1: restore from placeholder.
fn restore_node(node: &Node, schema: &MigrationSchema) -> Option<Node> {
    let (target_name, target_attrs) = node.placeholder_payload()?;
    let def = schema.node(&target_name)?;
    if def.is_leaf != node.kind.is_leaf || def.is_text != node.kind.is_text {
        return None;
    }
    let attrs = fill_and_trim_attrs(&target_attrs, &def.attrs)?;
    let ctx = ParentCtx {
        inline_content: schema.inline_content_of(def),
        forced: None,
    };
    let children = migrate_children_checked(&node.children, schema, &ctx, def)?;
    let marks = migrate_marks(&node.marks, schema, &def.marks, false);
    Some(Node {
        kind: NodeKind::new(def.name.clone(), def.is_leaf, def.is_inline, def.is_text),
        attrs,
        children,
        marks,
        text: node.text.clone(),
    })
}

/// Step 2: preserve by name (or, for an already-placeholder node, by the
/// same placeholder kind — which is just its own name).
fn preserve_node(node: &Node, schema: &MigrationSchema) -> Option<Node> {
    let def = schema.node(&node.kind.name)?;
    if def.is_leaf != node.kind.is_leaf {
        return None;
    }
    let attrs = fill_and_trim_attrs(&node.attrs, &def.attrs)?;
    let ctx = ParentCtx {
        inline_content: schema.inline_content_of(def),
        forced: None,
    };
    let children = migrate_children_checked(&node.children, schema, &ctx, def)?;
    let marks = migrate_marks(&node.marks, schema, &def.marks, false);
    Some(Node {
        kind: NodeKind::new(def.name.clone(), def.is_leaf, def.is_inline, def.is_text),
        attrs,
        children,
        marks,
        text: node.text.clone(),
    })
}

/// Step 3 (fresh node) and the forced-context reaffirmation of an
/// already-placeholder node: both end up building a placeholder, the only
/// difference being which bucket and what payload get reused.
fn wrap_node(node: &Node, schema: &MigrationSchema, parent: Option<&ParentCtx>) -> Option<Node> {
    let kind = match node.kind.placeholder_kind() {
        Some(existing) => existing,
        None => {
            let inline = parent.map(|p| p.inline_content).unwrap_or(node.kind.is_inline);
            PlaceholderKind::select(inline, node.kind.is_leaf)
        },
    };
    let def = schema.placeholder_node(kind)?;
    let (payload_name, payload_attrs) = node_placeholder_payload(node);
    let mut attrs = Map::new();
    attrs.insert("name".to_string(), Value::String(payload_name));
    attrs.insert("attrs".to_string(), payload_attrs);

    // A placeholder's own `isInline` (used above to pick its bucket) says
    // whether *it* is inline, not what its content admits. Since the
    // original schema's content expression isn't available here, approximate
    // it structurally: if every one of the node's actual children is
    // inline, treat its content as inline-only (spec §4.5 `parent.inlineContent`).
    let ctx = ParentCtx {
        inline_content: !node.children.is_empty() && node.children.iter().all(|c| c.kind.is_inline),
        forced: Some(kind),
    };
    let children = migrate_children_forced(&node.children, schema, &ctx)?;
    let marks = migrate_marks(&node.marks, schema, &def.marks, true);
    Some(Node {
        kind: placeholder_node_kind(def, node.kind.is_text),
        attrs,
        children,
        marks,
        text: node.text.clone(),
    })
}

/// Convert every child, requiring each result to be allowed by `def`'s
/// declared content (spec §4.5: "if the resulting node fails newSchema
/// validation, fall through").
fn migrate_children_checked(
    children: &[Node],
    schema: &MigrationSchema,
    ctx: &ParentCtx,
    def: &NodeTypeDef,
) -> Option<Vec<Node>> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        let converted = migrate_node(child, schema, Some(ctx))?;
        if !schema.content_allows(def, &converted.kind.name) {
            return None;
        }
        out.push(converted);
    }
    Some(out)
}

/// Convert every child under a forced-placeholder parent: no content
/// check, since a placeholder branch exists precisely to hold arbitrary
/// structure.
fn migrate_children_forced(children: &[Node], schema: &MigrationSchema, ctx: &ParentCtx) -> Option<Vec<Node>> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        out.push(migrate_node(child, schema, Some(ctx))?);
    }
    Some(out)
}

/// Mark conversion mirrors node conversion with only the `mark`
/// placeholder (spec §4.5). A mark that can't be converted at all, or
/// whose converted type isn't allowed by `allowed`, is dropped rather than
/// failing the whole node. Once every mark has converted, a mark excluded
/// by another surviving mark on the same node is dropped too (spec §4.5
/// "mark exclusion").
fn migrate_marks(marks: &[Mark], schema: &MigrationSchema, allowed: &MarksExpr, forced: bool) -> Vec<Mark> {
    let candidates: Vec<Mark> = marks
        .iter()
        .filter_map(|mark| migrate_mark(mark, schema, forced))
        .filter(|mark| schema.marks_allow(allowed, &mark.kind.name))
        .collect();

    let excluded: std::collections::HashSet<&str> = candidates
        .iter()
        .flat_map(|mark| schema.mark_excludes(&mark.kind.name).iter().map(String::as_str))
        .collect();

    candidates
        .into_iter()
        .filter(|mark| !excluded.contains(mark.kind.name.as_str()))
        .collect()
}

fn migrate_mark(mark: &Mark, schema: &MigrationSchema, forced: bool) -> Option<Mark> {
    if forced {
        return wrap_mark(mark, schema);
    }
    if mark.kind.is_placeholder() {
        if let Some(restored) = restore_mark(mark, schema) {
            return Some(restored);
        }
    }
    if let Some(preserved) = preserve_mark(mark, schema) {
        return Some(preserved);
    }
    if !mark.kind.is_placeholder() {
        if let Some(wrapped) = wrap_mark(mark, schema) {
            return Some(wrapped);
        }
    }
    None
}

fn restore_mark(mark: &Mark, schema: &MigrationSchema) -> Option<Mark> {
    let (name, attrs) = mark_placeholder_payload(mark);
    let def: &MarkTypeDef = schema.mark(&name)?;
    let filled = fill_and_trim_attrs(&attrs.as_object().cloned().unwrap_or_default(), &def.attrs)?;
    Some(Mark {
        kind: MarkKind::new(def.name.clone()),
        attrs: filled,
    })
}

fn preserve_mark(mark: &Mark, schema: &MigrationSchema) -> Option<Mark> {
    let def = schema.mark(&mark.kind.name)?;
    let filled = fill_and_trim_attrs(&mark.attrs, &def.attrs)?;
    Some(Mark {
        kind: MarkKind::new(def.name.clone()),
        attrs: filled,
    })
}

fn wrap_mark(mark: &Mark, schema: &MigrationSchema) -> Option<Mark> {
    schema.placeholder_mark()?;
    let (name, attrs) = mark_placeholder_payload(mark);
    let mut payload = Map::new();
    payload.insert("name".to_string(), Value::String(name));
    payload.insert("attrs".to_string(), attrs);
    Some(Mark {
        kind: placeholder_mark_kind(),
        attrs: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::schema::{AttrSpec, ContentExpr, MarkTypeDef, MarksExpr as ME, NodeTypeDef};
    use indexmap::IndexMap;
    use std::collections::HashSet;

    fn paragraph_def(allowed_marks: MarksExpr) -> NodeTypeDef {
        NodeTypeDef {
            name: "paragraph".into(),
            is_leaf: false,
            is_inline: false,
            is_text: false,
            attrs: IndexMap::new(),
            content: ContentExpr::OneOf(["text".to_string()].into_iter().collect()),
            marks: allowed_marks,
        }
    }

    fn text_def() -> NodeTypeDef {
        text_def_with_marks(MarksExpr::Any)
    }

    fn text_def_with_marks(marks: MarksExpr) -> NodeTypeDef {
        NodeTypeDef {
            name: "text".into(),
            is_leaf: true,
            is_inline: true,
            is_text: true,
            attrs: IndexMap::new(),
            content: ContentExpr::None,
            marks,
        }
    }

    fn doc_def(allowed: HashSet<String>) -> NodeTypeDef {
        NodeTypeDef {
            name: "doc".into(),
            is_leaf: false,
            is_inline: false,
            is_text: false,
            attrs: IndexMap::new(),
            content: ContentExpr::OneOf(allowed),
            marks: MarksExpr::None,
        }
    }

    fn block_branch_def() -> NodeTypeDef {
        NodeTypeDef {
            name: "blockBranch".into(),
            is_leaf: false,
            is_inline: false,
            is_text: false,
            attrs: {
                let mut m = IndexMap::new();
                m.insert("name".to_string(), AttrSpec::required());
                m.insert("attrs".to_string(), AttrSpec::with_default(serde_json::json!({})));
                m
            },
            content: ContentExpr::Any,
            marks: MarksExpr::Any,
        }
    }

    fn inline_leaf_def() -> NodeTypeDef {
        NodeTypeDef {
            name: "inlineLeaf".into(),
            is_leaf: true,
            is_inline: true,
            is_text: false,
            attrs: {
                let mut m = IndexMap::new();
                m.insert("name".to_string(), AttrSpec::required());
                m.insert("attrs".to_string(), AttrSpec::with_default(serde_json::json!({})));
                m
            },
            content: ContentExpr::None,
            marks: MarksExpr::Any,
        }
    }

    fn sample_doc() -> Node {
        Node::branch(
            "doc",
            false,
            Default::default(),
            vec![Node::branch(
                "paragraph",
                false,
                Default::default(),
                vec![Node::text("text", "hello", vec![])],
                vec![],
            )],
            vec![],
        )
    }

    #[test]
    fn identity_migration_preserves_every_node_by_name() {
        let schema = MigrationSchema::new()
            .with_node(doc_def(["paragraph".to_string()].into_iter().collect()))
            .with_node(paragraph_def(MarksExpr::Any))
            .with_node(text_def());

        let input = sample_doc();
        let output = change_schema(&input, &schema).unwrap().unwrap();
        assert_eq!(output.kind.name, "doc");
        assert_eq!(output.children[0].kind.name, "paragraph");
        assert_eq!(output.children[0].children[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn unknown_node_wraps_as_placeholder_then_restores() {
        // First migration: target schema has no "paragraph" node, only a
        // blockBranch placeholder — paragraph gets wrapped.
        let wrap_schema = MigrationSchema::new()
            .with_node(doc_def(["blockBranch".to_string()].into_iter().collect()))
            .with_node(block_branch_def())
            .with_node(inline_leaf_def())
            .with_node(text_def());

        let input = sample_doc();
        let wrapped = change_schema(&input, &wrap_schema).unwrap().unwrap();
        let wrapped_child = &wrapped.children[0];
        assert_eq!(wrapped_child.kind.name, "blockBranch");
        assert_eq!(
            wrapped_child.attrs.get("name").and_then(Value::as_str),
            Some("paragraph")
        );
        assert_eq!(wrapped_child.children[0].kind.name, "inlineLeaf");
        assert_eq!(wrapped_child.children[0].text.as_deref(), Some("hello"));

        // Second migration: target schema restores "paragraph" by name.
        let restore_schema = MigrationSchema::new()
            .with_node(doc_def(["paragraph".to_string()].into_iter().collect()))
            .with_node(paragraph_def(MarksExpr::Any))
            .with_node(text_def());

        let restored = change_schema(&wrapped, &restore_schema).unwrap().unwrap();
        assert_eq!(restored.children[0].kind.name, "paragraph");
        assert_eq!(restored.children[0].children[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn disallowed_mark_is_dropped() {
        // "bold" is a real, convertible mark type, but the text node's own
        // marks expression excludes it — it should still be dropped.
        let schema = MigrationSchema::new()
            .with_node(doc_def(["paragraph".to_string()].into_iter().collect()))
            .with_node(paragraph_def(ME::Any))
            .with_node(text_def_with_marks(MarksExpr::None))
            .with_mark(MarkTypeDef {
                name: "bold".into(),
                attrs: IndexMap::new(),
                excludes: HashSet::new(),
            });

        let input = Node::branch(
            "doc",
            false,
            Default::default(),
            vec![Node::branch(
                "paragraph",
                false,
                Default::default(),
                vec![Node::text(
                    "text",
                    "hi",
                    vec![Mark {
                        kind: MarkKind::new("bold"),
                        attrs: Default::default(),
                    }],
                )],
                vec![],
            )],
            vec![],
        );

        let output = change_schema(&input, &schema).unwrap().unwrap();
        assert!(output.children[0].children[0].marks.is_empty());
    }

    #[test]
    fn excluded_mark_is_dropped_but_the_others_survive() {
        // Mark "b" excludes mark "a"; a text node carries [a, b, c] and
        // should come out carrying [b, c].
        let schema = MigrationSchema::new()
            .with_node(doc_def(["paragraph".to_string()].into_iter().collect()))
            .with_node(paragraph_def(ME::Any))
            .with_node(text_def())
            .with_mark(MarkTypeDef {
                name: "a".into(),
                attrs: IndexMap::new(),
                excludes: HashSet::new(),
            })
            .with_mark(MarkTypeDef {
                name: "b".into(),
                attrs: IndexMap::new(),
                excludes: ["a".to_string()].into_iter().collect(),
            })
            .with_mark(MarkTypeDef {
                name: "c".into(),
                attrs: IndexMap::new(),
                excludes: HashSet::new(),
            });

        let input = Node::branch(
            "doc",
            false,
            Default::default(),
            vec![Node::branch(
                "paragraph",
                false,
                Default::default(),
                vec![Node::text(
                    "text",
                    "hi",
                    vec![
                        Mark { kind: MarkKind::new("a"), attrs: Default::default() },
                        Mark { kind: MarkKind::new("b"), attrs: Default::default() },
                        Mark { kind: MarkKind::new("c"), attrs: Default::default() },
                    ],
                )],
                vec![],
            )],
            vec![],
        );

        let output = change_schema(&input, &schema).unwrap().unwrap();
        let marks = &output.children[0].children[0].marks;
        let names: Vec<&str> = marks.iter().map(|m| m.kind.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn impossible_conversion_yields_none() {
        // No paragraph node and no blockBranch placeholder declared:
        // paragraph can't be preserved or wrapped, so the whole document
        // migration fails.
        let schema = MigrationSchema::new().with_node(text_def());
        let input = sample_doc();
        assert!(change_schema(&input, &schema).unwrap().is_none());
    }

    #[test]
    fn mark_without_placeholder_declared_is_just_dropped() {
        let schema = MigrationSchema::new()
            .with_node(doc_def(["paragraph".to_string()].into_iter().collect()))
            .with_node(paragraph_def(ME::Any))
            .with_node(text_def());

        let input = Node::branch(
            "doc",
            false,
            Default::default(),
            vec![Node::branch(
                "paragraph",
                false,
                Default::default(),
                vec![Node::text(
                    "text",
                    "hi",
                    vec![Mark {
                        kind: MarkKind::new("unknown-mark"),
                        attrs: Default::default(),
                    }],
                )],
                vec![],
            )],
            vec![],
        );

        // No `mark` placeholder declared, and "unknown-mark" isn't a
        // declared mark type, so it's dropped rather than preserved.
        let output = change_schema(&input, &schema).unwrap().unwrap();
        assert!(output.children[0].children[0].marks.is_empty());
    }
}
