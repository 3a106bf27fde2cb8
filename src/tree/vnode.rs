//! Virtual nodes - immutable tree snapshots.
//!
//! A [`VNode`] describes what a subtree should look like. Render functions
//! build a fresh tree on every pass; the reconciler compares two snapshots
//! structurally (never by identity) and patches the live tree to match.

use std::collections::BTreeMap;

/// A virtual tree node: either a text leaf or an element with a tag,
/// attributes, and ordered children.
#[derive(Clone, Debug, PartialEq)]
pub enum VNode {
    Text(String),
    Element(VElement),
}

impl VNode {
    /// Text leaf.
    pub fn text(content: impl Into<String>) -> Self {
        VNode::Text(content.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, VNode::Text(_))
    }

    /// Total node count of this subtree (diagnostics and size assertions).
    pub fn node_count(&self) -> usize {
        match self {
            VNode::Text(_) => 1,
            VNode::Element(el) => 1 + el.children.iter().map(VNode::node_count).sum::<usize>(),
        }
    }
}

/// Element snapshot: tag, attributes, ordered children.
#[derive(Clone, Debug, PartialEq)]
pub struct VElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<VNode>,
}

impl VElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<VNode>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn children(mut self, nodes: impl IntoIterator<Item = VNode>) -> Self {
        self.children.extend(nodes);
        self
    }
}

impl From<VElement> for VNode {
    fn from(el: VElement) -> Self {
        VNode::Element(el)
    }
}

/// Shorthand element builder: `el("div").attr("class", "row").child(text("hi"))`.
pub fn el(tag: impl Into<String>) -> VElement {
    VElement::new(tag)
}

/// Shorthand text builder.
pub fn text(content: impl Into<String>) -> VNode {
    VNode::text(content)
}

// =============================================================================
// Tests
// =============================================================================
