//! Live nodes - the mutable, stateful rendered tree.
//!
//! A [`LiveNode`] is what the reconciler's patches target. Unlike a virtual
//! node it has identity: handles are `Rc`-shared, compared with
//! [`LiveNode::ptr_eq`], and external state can be attached out-of-band via
//! the property map. The reconciler must preserve a node's identity whenever
//! its structural description is unchanged, so attached state survives
//! re-render.
//!
//! Every structural mutation bumps the node's revision counter, which is how
//! tests verify that untouched nodes were not rewritten.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::value::Value;

use super::vnode::{VElement, VNode};

enum LiveKind {
    Text(String),
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<LiveNode>,
    },
}

struct LiveNodeInner {
    kind: LiveKind,
    /// Out-of-band state attached by external collaborators (focus, custom
    /// properties). Never touched by the reconciler.
    props: BTreeMap<String, Value>,
    revision: u64,
}

/// Handle to one node of the rendered tree. Clones share the node.
#[derive(Clone)]
pub struct LiveNode {
    inner: Rc<RefCell<LiveNodeInner>>,
}

impl LiveNode {
    /// Construct a fresh live subtree rendering `vnode`.
    pub fn from_vnode(vnode: &VNode) -> Self {
        let kind = match vnode {
            VNode::Text(content) => LiveKind::Text(content.clone()),
            VNode::Element(el) => LiveKind::Element {
                tag: el.tag.clone(),
                attrs: el.attrs.clone(),
                children: el.children.iter().map(LiveNode::from_vnode).collect(),
            },
        };
        LiveNode {
            inner: Rc::new(RefCell::new(LiveNodeInner {
                kind,
                props: BTreeMap::new(),
                revision: 0,
            })),
        }
    }

    /// An empty element node, usable as a mount host.
    pub fn element(tag: impl Into<String>) -> Self {
        LiveNode::from_vnode(&VNode::Element(VElement::new(tag)))
    }

    /// Identity comparison: do two handles refer to the same node?
    pub fn ptr_eq(a: &LiveNode, b: &LiveNode) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Mutation count. Unchanged between two reads = node untouched.
    pub fn revision(&self) -> u64 {
        self.inner.borrow().revision
    }

    // -------------------------------------------------------------------------
    // Structure accessors
    // -------------------------------------------------------------------------

    pub fn is_text(&self) -> bool {
        matches!(self.inner.borrow().kind, LiveKind::Text(_))
    }

    pub fn text(&self) -> Option<String> {
        match &self.inner.borrow().kind {
            LiveKind::Text(content) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<String> {
        match &self.inner.borrow().kind {
            LiveKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match &self.inner.borrow().kind {
            LiveKind::Element { attrs, .. } => attrs.get(name).cloned(),
            _ => None,
        }
    }

    pub fn attrs(&self) -> BTreeMap<String, String> {
        match &self.inner.borrow().kind {
            LiveKind::Element { attrs, .. } => attrs.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn children(&self) -> Vec<LiveNode> {
        match &self.inner.borrow().kind {
            LiveKind::Element { children, .. } => children.clone(),
            _ => Vec::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        match &self.inner.borrow().kind {
            LiveKind::Element { children, .. } => children.len(),
            _ => 0,
        }
    }

    /// Snapshot this subtree's structure as a virtual node (out-of-band
    /// properties are not part of the structure).
    pub fn describe(&self) -> VNode {
        match &self.inner.borrow().kind {
            LiveKind::Text(content) => VNode::Text(content.clone()),
            LiveKind::Element {
                tag,
                attrs,
                children,
            } => VNode::Element(VElement {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: children.iter().map(LiveNode::describe).collect(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Out-of-band properties
    // -------------------------------------------------------------------------

    /// Attach external state to this node. Survives any patch that preserves
    /// the node's identity.
    pub fn set_prop(&self, name: impl Into<String>, value: Value) {
        self.inner.borrow_mut().props.insert(name.into(), value);
    }

    pub fn prop(&self, name: &str) -> Option<Value> {
        self.inner.borrow().props.get(name).cloned()
    }

    // -------------------------------------------------------------------------
    // Mutators (reconciler and mount plumbing)
    // -------------------------------------------------------------------------

    pub(crate) fn set_text(&self, content: &str) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Text(existing) = &mut inner.kind {
            *existing = content.to_string();
            inner.revision += 1;
        }
    }

    pub(crate) fn set_attr(&self, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { attrs, .. } = &mut inner.kind {
            attrs.insert(name.to_string(), value.to_string());
            inner.revision += 1;
        }
    }

    pub(crate) fn remove_attr(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { attrs, .. } = &mut inner.kind {
            if attrs.remove(name).is_some() {
                inner.revision += 1;
            }
        }
    }

    pub(crate) fn push_child(&self, child: LiveNode) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { children, .. } = &mut inner.kind {
            children.push(child);
            inner.revision += 1;
        }
    }

    pub(crate) fn truncate_children(&self, len: usize) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { children, .. } = &mut inner.kind {
            if children.len() > len {
                children.truncate(len);
                inner.revision += 1;
            }
        }
    }

    /// Swap the child at `index` for `replacement`.
    pub(crate) fn replace_child_at(&self, index: usize, replacement: LiveNode) {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { children, .. } = &mut inner.kind {
            if index < children.len() {
                children[index] = replacement;
                inner.revision += 1;
            }
        }
    }

    /// Swap `old` (found by identity) for `replacement`. Returns whether the
    /// child was found.
    pub(crate) fn replace_child(&self, old: &LiveNode, replacement: LiveNode) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { children, .. } = &mut inner.kind {
            if let Some(pos) = children.iter().position(|c| LiveNode::ptr_eq(c, old)) {
                children[pos] = replacement;
                inner.revision += 1;
                return true;
            }
        }
        false
    }

    /// Remove `child` (found by identity). Returns whether it was present.
    pub(crate) fn remove_child(&self, child: &LiveNode) -> bool {
        let mut inner = self.inner.borrow_mut();
        if let LiveKind::Element { children, .. } = &mut inner.kind {
            if let Some(pos) = children.iter().position(|c| LiveNode::ptr_eq(c, child)) {
                children.remove(pos);
                inner.revision += 1;
                return true;
            }
        }
        false
    }

    /// Append a mounted subtree under this host node.
    pub fn mount_child(&self, child: LiveNode) {
        self.push_child(child);
    }

    /// Detach a mounted subtree. Returns whether it was present.
    pub fn unmount_child(&self, child: &LiveNode) -> bool {
        self.remove_child(child)
    }
}

impl std::fmt::Debug for LiveNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveNode")
            .field("structure", &self.describe())
            .field("revision", &self.revision())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
