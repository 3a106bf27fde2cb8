//! Virtual tree and reconciliation.
//!
//! - [`vnode`] - immutable tree snapshots built by render functions
//! - [`live`] - the mutable rendered tree with stable node identity
//! - [`reconcile`] - the diff/patch pass between the two

pub mod live;
pub mod reconcile;
pub mod vnode;

pub use live::LiveNode;
pub use reconcile::{PatchFlags, Reconciliation, reconcile};
pub use vnode::{VElement, VNode, el, text};
