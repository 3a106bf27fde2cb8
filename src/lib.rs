//! # ripple-ui
//!
//! Client-side UI plumbing: an event bus, a hierarchical state store, a tree
//! reconciler, and the binder that glues them into a render loop.
//!
//! ## Architecture
//!
//! The four pieces compose into one data-flow pipeline:
//! ```text
//! Store write → bus emission → Binder re-render → reconcile → LiveNode patch
//! ```
//!
//! - [`bus`] - priority-scheduled pub/sub with ownership-scoped cleanup
//! - [`store`] - path-addressed state tree with batched mutation
//! - [`tree`] - virtual snapshots, the live rendered tree, and the diff pass
//!   between them
//! - [`binder`] - binds a render function to store paths and drives the
//!   render/reconcile cycle
//!
//! Everything is single-threaded: handles are `Rc`-shared and `Clone` gives
//! another reference to the same bus/store/node, never a copy.
//!
//! Ownership is the cleanup story throughout. Registrations made under an
//! [`bus::OwnerToken`] - bus handlers, store path subscriptions, a binder's
//! entire footprint - are removed together by a single
//! [`bus::EventBus::cleanup_owner`] call, and registrations whose owner was
//! dropped are skipped and reaped automatically.

pub mod binder;
pub mod bus;
pub mod error;
pub mod store;
pub mod tree;
pub mod value;

pub use binder::{Binder, BinderState, RENDER_EVENT};

pub use bus::{
    BusConfig, EventBus, Emission, LeakReport, OwnerToken, Priority, RegistrationInfo,
    SubscribeOptions, Subscription, TICK_EVENT, WARNING_EVENT, WILDCARD,
};

pub use error::{BusError, StoreError};

pub use store::{BATCH_CHANGED_EVENT, CHANGED_EVENT, Store, StoreSubscription};

pub use tree::{
    LiveNode, PatchFlags, Reconciliation, VElement, VNode, el, reconcile, text,
};

pub use value::Value;
