//! The structural-equivalence ("shape") checker (spec §4.6), also used as
//! the migration engine's post-condition assertion (spec §4.5).

use super::node::Node;

/// `nodeSize`: `1` for a non-text leaf, the character count for a text
/// node, `2 + sum(child sizes)` for a branch — mirroring how a branch node
/// contributes its own open/close boundary to a document's position
/// space.
pub fn node_size(node: &Node) -> usize {
    if node.kind.is_text {
        node.text.as_deref().map(|s| s.chars().count()).unwrap_or(0)
    } else if node.kind.is_leaf {
        1
    } else {
        2 + node.children.iter().map(node_size).sum::<usize>()
    }
}

/// Two nodes are the same shape iff `isLeaf`, `isText`, and `nodeSize`
/// agree, and, after coalescing consecutive text children in both,
/// matching positions are themselves same-shape (spec §4.6).
pub fn same_shape(a: &Node, b: &Node) -> bool {
    if a.kind.is_leaf != b.kind.is_leaf || a.kind.is_text != b.kind.is_text {
        return false;
    }
    if node_size(a) != node_size(b) {
        return false;
    }
    let ca = coalesce(&a.children);
    let cb = coalesce(&b.children);
    if ca.len() != cb.len() {
        return false;
    }
    ca.iter().zip(cb.iter()).all(|pair| match pair {
        (Run::Text(lx), Run::Text(ly)) => lx == ly,
        (Run::Child(nx), Run::Child(ny)) => same_shape(nx, ny),
        _ => false,
    })
}

enum Run<'a> {
    /// A coalesced run of consecutive text children, carrying its total
    /// character length.
    Text(usize),
    Child(&'a Node),
}

fn coalesce(children: &[Node]) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut run_len = 0usize;
    let mut in_run = false;
    for child in children {
        if child.kind.is_text {
            run_len += child.text.as_deref().map(|s| s.chars().count()).unwrap_or(0);
            in_run = true;
        } else {
            if in_run {
                out.push(Run::Text(run_len));
                run_len = 0;
                in_run = false;
            }
            out.push(Run::Child(child));
        }
    }
    if in_run {
        out.push(Run::Text(run_len));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::node::{MarkKind, Mark};

    fn text(s: &str) -> Node {
        Node::text("text", s, vec![])
    }

    #[test]
    fn identical_trees_are_same_shape() {
        let a = Node::branch("p", false, Default::default(), vec![text("hi")], vec![]);
        let b = a.clone();
        assert!(same_shape(&a, &b));
    }

    #[test]
    fn coalesced_text_runs_with_different_marks_still_match() {
        let marked = Node::text(
            "text",
            "world",
            vec![Mark {
                kind: MarkKind::new("bold"),
                attrs: Default::default(),
            }],
        );
        let a = Node::branch("p", false, Default::default(), vec![text("hello"), marked], vec![]);
        // Same coalesced length (10 = 5 + 5) split differently.
        let b = Node::branch("p", false, Default::default(), vec![text("helloworld")], vec![]);
        assert!(same_shape(&a, &b));
    }

    #[test]
    fn differing_leaf_flag_is_not_same_shape() {
        let a = Node::leaf("img", false, Default::default(), vec![]);
        let b = Node::branch("img", false, Default::default(), vec![], vec![]);
        assert!(!same_shape(&a, &b));
    }

    #[test]
    fn differing_child_count_is_not_same_shape() {
        let a = Node::branch("p", false, Default::default(), vec![text("a")], vec![]);
        let b = Node::branch(
            "p",
            false,
            Default::default(),
            vec![text("a"), Node::leaf("img", false, Default::default(), vec![])],
            vec![],
        );
        assert!(!same_shape(&a, &b));
    }
}
