//! Parser contract (§6.2): a structure parallel to the value tree.
//!
//! Every composite node of a compiled [`Value`](crate::value::Value) tree
//! has a matching [`SourceMap`] node carrying that node's own `Span` plus,
//! for forms/arrays, one child entry per element. `getindex`/`getkey`/
//! `getvalue` descend both the value and the map together so that a
//! diagnostic raised four levels deep in a nested form still points at the
//! right byte range.

use crate::value::Value;
use std::rc::Rc;

/// A source map node. Leaves (atoms) carry just a span; composites carry a
/// span for the whole node plus one child per element, index-aligned with
/// the value's own children.
#[derive(Debug, Clone)]
pub enum SourceMap {
    Leaf(crate::span::Span),
    Node(crate::span::Span, Rc<Vec<SourceMap>>),
}

impl SourceMap {
    pub fn leaf(span: crate::span::Span) -> Self {
        SourceMap::Leaf(span)
    }

    pub fn node(span: crate::span::Span, children: Vec<SourceMap>) -> Self {
        SourceMap::Node(span, Rc::new(children))
    }

    /// The span of this node itself, regardless of leaf/composite.
    pub fn span(&self) -> crate::span::Span {
        match self {
            SourceMap::Leaf(s) => *s,
            SourceMap::Node(s, _) => *s,
        }
    }

    /// Descend into the `i`th child, or fall back to this node's own span
    /// if the map has no matching entry (e.g. the value tree is better
    /// formed than its map — should not happen, but diagnostics degrade
    /// gracefully rather than panicking).
    pub fn child(&self, i: usize) -> SourceMap {
        match self {
            SourceMap::Node(_, children) => children
                .get(i)
                .cloned()
                .unwrap_or_else(|| SourceMap::Leaf(self.span())),
            SourceMap::Leaf(s) => SourceMap::Leaf(*s),
        }
    }

    /// A placeholder map for synthetic values the compiler itself
    /// constructs (e.g. an implicit `nil` for an empty `do`).
    pub fn dummy() -> Self {
        SourceMap::Leaf(crate::span::Span::dummy())
    }
}

/// Get the sub-map for the `index`th element of a form/array node.
/// Mirrors the original's `dstc_getindex`.
pub fn getindex(map: &SourceMap, index: usize) -> SourceMap {
    map.child(index)
}

/// Get the sub-map for a dictionary key at position `index` in key/value
/// pairs. Mirrors `dstc_getkey`.
pub fn getkey(map: &SourceMap, index: usize) -> SourceMap {
    map.child(index * 2)
}

/// Get the sub-map for a dictionary value at position `index`. Mirrors
/// `dstc_getvalue`.
pub fn getvalue(map: &SourceMap, index: usize) -> SourceMap {
    map.child(index * 2 + 1)
}

/// Build a source map that mirrors the shape of `value`, assigning every
/// node the same dummy span. Used by tests and by callers that have no real
/// source text (e.g. programmatically constructed forms).
pub fn dummy_for(value: &Value) -> SourceMap {
    match value {
        Value::Form(items) | Value::Array(items) => {
            let children = items.borrow().iter().map(dummy_for).collect();
            SourceMap::node(crate::span::Span::dummy(), children)
        }
        _ => SourceMap::leaf(crate::span::Span::dummy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn child_falls_back_to_parent_span_when_missing() {
        let leaf = SourceMap::leaf(Span::new(1, 2));
        assert_eq!(leaf.child(0).span(), Span::new(1, 2));
    }

    #[test]
    fn node_children_are_index_aligned() {
        let map = SourceMap::node(
            Span::new(0, 10),
            vec![SourceMap::leaf(Span::new(1, 2)), SourceMap::leaf(Span::new(3, 4))],
        );
        assert_eq!(getindex(&map, 0).span(), Span::new(1, 2));
        assert_eq!(getindex(&map, 1).span(), Span::new(3, 4));
    }

    #[test]
    fn dummy_for_mirrors_nested_shape() {
        let v = Value::form(vec![Value::number(1.0), Value::form(vec![Value::number(2.0)])]);
        let m = dummy_for(&v);
        // Should not panic descending into the nested form's child.
        let _ = getindex(&getindex(&m, 1), 0);
    }
}
