//! Tree reconciliation - minimal diff/patch against the live tree.
//!
//! Given the previous virtual tree, the new virtual tree, and the live node
//! currently rendering the previous tree, [`reconcile`] applies the smallest
//! set of mutations that makes the live tree render the new tree:
//!
//! 1. Text vs text: update the content in place when it differs; equal
//!    content touches nothing (the live node keeps its identity and its
//!    revision counter does not move).
//! 2. Element vs element with the same tag: add/update/remove only the
//!    attributes that changed, then recurse over children index by index -
//!    trailing new children are appended, surplus live children removed.
//! 3. Different tags (or text vs element): replace the node wholesale. The
//!    returned [`Reconciliation::node`] is a fresh subtree and the caller
//!    swaps it into the parent; externally attached state on the old node is
//!    discarded (different tag means different identity).
//!
//! Children are compared strictly by index - there is no keyed reordering, so
//! rotating a list rewrites every trailing element. Known limitation, kept
//! faithful to the behavior this algorithm specifies.
//!
//! The pass is a pure function of its inputs with the live tree as its only
//! side-effect target: no state is held between invocations, every subtree is
//! visited at most once, and cost is O(nodes of the larger tree).

use bitflags::bitflags;

use super::live::LiveNode;
use super::vnode::VNode;

bitflags! {
    /// Which kinds of mutation a reconciliation performed.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PatchFlags: u8 {
        const TEXT     = 1 << 0;
        const ATTRS    = 1 << 1;
        const CHILDREN = 1 << 2;
        const REPLACED = 1 << 3;
    }
}

/// Outcome of one reconciliation pass.
pub struct Reconciliation {
    /// The live node now rendering the new tree. Identical (by identity) to
    /// the input node unless the pass replaced it; on replacement the caller
    /// must swap this into the parent.
    pub node: LiveNode,
    pub flags: PatchFlags,
    /// Individual mutations applied (attribute writes, text updates, child
    /// insertions/removals, replacements).
    pub mutations: usize,
}

impl Reconciliation {
    fn untouched(node: LiveNode) -> Self {
        Reconciliation {
            node,
            flags: PatchFlags::empty(),
            mutations: 0,
        }
    }
}

/// Patch `live` (currently rendering `prev`) to render `next`.
pub fn reconcile(prev: &VNode, next: &VNode, live: &LiveNode) -> Reconciliation {
    match (prev, next) {
        (VNode::Text(old), VNode::Text(new)) => {
            if !live.is_text() {
                return replace_mismatched(next, live);
            }
            if old == new {
                Reconciliation::untouched(live.clone())
            } else {
                live.set_text(new);
                Reconciliation {
                    node: live.clone(),
                    flags: PatchFlags::TEXT,
                    mutations: 1,
                }
            }
        }

        (VNode::Element(old), VNode::Element(new)) if old.tag == new.tag => {
            if live.tag().as_deref() != Some(new.tag.as_str()) {
                return replace_mismatched(next, live);
            }

            let mut flags = PatchFlags::empty();
            let mut mutations = 0;

            // Attributes: write only what changed, remove only what vanished.
            for (name, value) in &new.attrs {
                if old.attrs.get(name) != Some(value) {
                    live.set_attr(name, value);
                    flags |= PatchFlags::ATTRS;
                    mutations += 1;
                }
            }
            for name in old.attrs.keys() {
                if !new.attrs.contains_key(name) {
                    live.remove_attr(name);
                    flags |= PatchFlags::ATTRS;
                    mutations += 1;
                }
            }

            // Children, strictly by index.
            let live_children = live.children();
            let common = old.children.len().min(new.children.len());
            for i in 0..common {
                let Some(live_child) = live_children.get(i) else {
                    // Live tree is shallower than the previous snapshot
                    // claims; rebuild the missing child outright.
                    tracing::error!(tag = %new.tag, index = i, "live tree out of sync with snapshot");
                    live.push_child(LiveNode::from_vnode(&new.children[i]));
                    flags |= PatchFlags::CHILDREN;
                    mutations += 1;
                    continue;
                };
                let child_result = reconcile(&old.children[i], &new.children[i], live_child);
                if !LiveNode::ptr_eq(&child_result.node, live_child) {
                    live.replace_child_at(i, child_result.node);
                }
                flags |= child_result.flags;
                mutations += child_result.mutations;
            }

            // Append trailing new children.
            for vchild in &new.children[common..] {
                live.push_child(LiveNode::from_vnode(vchild));
                flags |= PatchFlags::CHILDREN;
                mutations += 1;
            }

            // Remove surplus live children.
            if old.children.len() > new.children.len() {
                let surplus = live.child_count().saturating_sub(new.children.len());
                live.truncate_children(new.children.len());
                flags |= PatchFlags::CHILDREN;
                mutations += surplus;
            }

            Reconciliation {
                node: live.clone(),
                flags,
                mutations,
            }
        }

        // Different tags, or text vs element: different identity.
        _ => Reconciliation {
            node: LiveNode::from_vnode(next),
            flags: PatchFlags::REPLACED,
            mutations: 1,
        },
    }
}

/// The live node does not match the shape the previous snapshot claims.
/// Contained locally: report it and rebuild the subtree.
fn replace_mismatched(next: &VNode, live: &LiveNode) -> Reconciliation {
    tracing::error!(
        live = ?live.tag(),
        "live node shape does not match previous snapshot; rebuilding subtree"
    );
    Reconciliation {
        node: LiveNode::from_vnode(next),
        flags: PatchFlags::REPLACED,
        mutations: 1,
    }
}

// =============================================================================
// Tests
// =============================================================================
