//! Component binder - re-runs render+reconcile when bound state changes.
//!
//! A [`Binder`] connects a render function to store paths. On
//! [`attach`](Binder::attach) it renders once, mounts the resulting live
//! subtree under the host node, and subscribes to every bound path under its
//! own [`OwnerToken`]. Each matching store notification recomputes the
//! virtual tree, reconciles it against the live subtree, and keeps the new
//! snapshot for the next diff.
//!
//! [`destroy`](Binder::destroy) unmounts the subtree and calls
//! `EventBus::cleanup_owner` with the binder's token, removing every store
//! subscription (and anything else registered under the token) in one step.
//! Destroyed is terminal: notifications arriving afterwards never invoke the
//! render function again.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bus::{EventBus, OwnerToken, Priority};
use crate::error::StoreError;
use crate::store::Store;
use crate::tree::{LiveNode, VNode, reconcile};
use crate::value::Value;

/// Published after every completed render/reconcile pass.
pub const RENDER_EVENT: &str = "component:render";

/// Lifecycle: `Unattached → Attached → Destroyed` (terminal).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinderState {
    Unattached,
    Attached,
    Destroyed,
}

/// Render function: current store state in, fresh virtual tree out.
pub type RenderFn = Rc<dyn Fn(&Store) -> VNode>;

struct BinderInner {
    store: Store,
    bus: EventBus,
    host: LiveNode,
    render: RenderFn,
    paths: Vec<String>,
    owner: OwnerToken,
    state: BinderState,
    prev: Option<VNode>,
    live: Option<LiveNode>,
    /// Guards against a render function that writes a bound path.
    rendering: bool,
}

/// Binds a render function to store paths. Cloning shares the binder.
#[derive(Clone)]
pub struct Binder {
    inner: Rc<RefCell<BinderInner>>,
}

impl Binder {
    /// Create an unattached binder. `paths` are the store paths whose changes
    /// re-run `render`; the live subtree will mount under `host`.
    pub fn new(
        store: &Store,
        host: &LiveNode,
        paths: impl IntoIterator<Item = impl Into<String>>,
        render: impl Fn(&Store) -> VNode + 'static,
    ) -> Self {
        Binder {
            inner: Rc::new(RefCell::new(BinderInner {
                store: store.clone(),
                bus: store.bus(),
                host: host.clone(),
                render: Rc::new(render),
                paths: paths.into_iter().map(Into::into).collect(),
                owner: OwnerToken::new(),
                state: BinderState::Unattached,
                prev: None,
                live: None,
                rendering: false,
            })),
        }
    }

    pub fn state(&self) -> BinderState {
        self.inner.borrow().state
    }

    /// The token this binder registers its subscriptions under. External
    /// collaborators may register additional handlers with it; `destroy`
    /// cleans those up too.
    pub fn owner(&self) -> OwnerToken {
        self.inner.borrow().owner.clone()
    }

    /// The live subtree currently mounted, if attached.
    pub fn live_root(&self) -> Option<LiveNode> {
        self.inner.borrow().live.clone()
    }

    /// Render once, mount the live subtree under the host, and subscribe to
    /// every bound path. No-op (with a warning) unless currently unattached.
    pub fn attach(&self) -> Result<(), StoreError> {
        {
            let inner = self.inner.borrow();
            if inner.state != BinderState::Unattached {
                tracing::warn!(state = ?inner.state, "attach on a binder that is not unattached");
                return Ok(());
            }
        }

        let (store, render, host, paths, owner, bus) = {
            let inner = self.inner.borrow();
            (
                inner.store.clone(),
                Rc::clone(&inner.render),
                inner.host.clone(),
                inner.paths.clone(),
                inner.owner.clone(),
                inner.bus.clone(),
            )
        };

        // Subscribe before mounting: notifications no-op until the state
        // flips to attached, and a bad path leaves nothing mounted.
        for path in &paths {
            let weak = Rc::downgrade(&self.inner);
            if let Err(err) =
                store.subscribe_owned(path, move |_| Binder::rerender(&weak), &owner)
            {
                bus.cleanup_owner(&owner);
                return Err(err);
            }
        }

        // Initial render outside any borrow: the render function is free to
        // read the store.
        let vnode = (render)(&store);
        let live = LiveNode::from_vnode(&vnode);
        host.mount_child(live.clone());

        {
            let mut inner = self.inner.borrow_mut();
            inner.prev = Some(vnode);
            inner.live = Some(live);
            inner.state = BinderState::Attached;
        }

        let _ = bus.emit(
            RENDER_EVENT,
            Value::object_from([("phase", Value::from("attach"))]),
            Priority::Normal,
        );
        Ok(())
    }

    /// Unmount the live subtree and remove every registration owned by this
    /// binder. Terminal and idempotent.
    pub fn destroy(&self) {
        let (host, live, owner, bus, was_attached) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == BinderState::Destroyed {
                return;
            }
            let was_attached = inner.state == BinderState::Attached;
            inner.state = BinderState::Destroyed;
            (
                inner.host.clone(),
                inner.live.take(),
                inner.owner.clone(),
                inner.bus.clone(),
                was_attached,
            )
        };

        if let Some(live) = live {
            host.unmount_child(&live);
        }
        if was_attached {
            bus.cleanup_owner(&owner);
        }
        self.inner.borrow_mut().prev = None;
    }

    /// One render/reconcile pass, driven by a store notification.
    fn rerender(weak: &Weak<RefCell<BinderInner>>) {
        let Some(inner_rc) = weak.upgrade() else {
            return;
        };

        let (store, render, prev, live, host, bus) = {
            let mut inner = inner_rc.borrow_mut();
            if inner.state != BinderState::Attached || inner.rendering {
                return;
            }
            let (Some(prev), Some(live)) = (inner.prev.clone(), inner.live.clone()) else {
                return;
            };
            inner.rendering = true;
            (
                inner.store.clone(),
                Rc::clone(&inner.render),
                prev,
                live,
                inner.host.clone(),
                inner.bus.clone(),
            )
        };

        let next = (render)(&store);
        let result = reconcile(&prev, &next, &live);
        if !LiveNode::ptr_eq(&result.node, &live) {
            host.replace_child(&live, result.node.clone());
        }

        {
            let mut inner = inner_rc.borrow_mut();
            inner.prev = Some(next);
            inner.live = Some(result.node);
            inner.rendering = false;
        }

        let _ = bus.emit(
            RENDER_EVENT,
            Value::object_from([
                ("phase", Value::from("update")),
                ("mutations", Value::from(result.mutations as i64)),
            ]),
            Priority::Normal,
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SubscribeOptions;
    use crate::tree::{el, text};
    use std::cell::Cell;

    fn fixture() -> (EventBus, Store, LiveNode) {
        let bus = EventBus::new();
        let store = Store::new(&bus);
        let host = LiveNode::element("root");
        (bus, store, host)
    }

    fn counter_view(store: &Store) -> VNode {
        let count = store
            .get("count")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        el("div")
            .attr("class", "counter")
            .child(text(format!("count: {count}")))
            .into()
    }

    #[test]
    fn test_attach_mounts_initial_render() {
        let (_bus, store, host) = fixture();
        store.initialize(Value::object_from([("count", Value::from(3))]));

        let binder = Binder::new(&store, &host, ["count"], counter_view);
        assert_eq!(binder.state(), BinderState::Unattached);

        binder.attach().unwrap();
        assert_eq!(binder.state(), BinderState::Attached);
        assert_eq!(host.child_count(), 1);

        let live = binder.live_root().unwrap();
        assert_eq!(
            live.children()[0].text().as_deref(),
            Some("count: 3")
        );
    }

    #[test]
    fn test_bound_path_change_rerenders_in_place() {
        let (_bus, store, host) = fixture();
        store.initialize(Value::object_from([("count", Value::from(0))]));

        let binder = Binder::new(&store, &host, ["count"], counter_view);
        binder.attach().unwrap();
        let live = binder.live_root().unwrap();

        store.set("count", 7).unwrap();
        // Same tag: identity preserved, text patched in place.
        assert!(LiveNode::ptr_eq(&binder.live_root().unwrap(), &live));
        assert_eq!(
            live.children()[0].text().as_deref(),
            Some("count: 7")
        );
    }

    #[test]
    fn test_unbound_path_does_not_rerender() {
        let (bus, store, host) = fixture();
        let renders = Rc::new(Cell::new(0));
        let renders_clone = renders.clone();
        bus.subscribe(
            RENDER_EVENT,
            move |_| renders_clone.set(renders_clone.get() + 1),
            SubscribeOptions::default(),
        )
        .unwrap();

        let binder = Binder::new(&store, &host, ["count"], counter_view);
        binder.attach().unwrap();

        store.set("unrelated", 1).unwrap();
        bus.flush(); // render events are batched at Normal priority
        assert_eq!(renders.get(), 1); // only the attach render
    }

    #[test]
    fn test_replacement_swapped_into_host() {
        let (_bus, store, host) = fixture();
        store.initialize(Value::object_from([("count", Value::from(0))]));

        // Tag flips once count goes positive: forces a wholesale replace.
        let binder = Binder::new(&store, &host, ["count"], |store: &Store| {
            let count = store.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if count > 0.0 {
                el("strong").into()
            } else {
                el("em").into()
            }
        });
        binder.attach().unwrap();
        let old = binder.live_root().unwrap();

        store.set("count", 1).unwrap();
        let new = binder.live_root().unwrap();
        assert!(!LiveNode::ptr_eq(&old, &new));
        assert_eq!(new.tag().as_deref(), Some("strong"));
        // Host holds the replacement, not the stale node.
        assert!(LiveNode::ptr_eq(&host.children()[0], &new));
    }

    #[test]
    fn test_destroy_unmounts_and_silences() {
        let (_bus, store, host) = fixture();
        let renders = Rc::new(Cell::new(0));
        let renders_clone = renders.clone();

        let binder = Binder::new(&store, &host, ["count"], move |_: &Store| {
            renders_clone.set(renders_clone.get() + 1);
            el("div").into()
        });
        binder.attach().unwrap();
        assert_eq!(renders.get(), 1);
        assert_eq!(host.child_count(), 1);

        binder.destroy();
        assert_eq!(binder.state(), BinderState::Destroyed);
        assert_eq!(host.child_count(), 0);

        // Further writes must never invoke render again.
        store.set("count", 5).unwrap();
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn test_destroy_is_terminal() {
        let (_bus, store, host) = fixture();
        let binder = Binder::new(&store, &host, ["count"], counter_view);
        binder.attach().unwrap();
        binder.destroy();
        binder.destroy(); // idempotent

        // Re-attach is disallowed; state stays terminal.
        binder.attach().unwrap();
        assert_eq!(binder.state(), BinderState::Destroyed);
        assert_eq!(host.child_count(), 0);
    }

    #[test]
    fn test_destroy_cleans_extra_owner_registrations() {
        let (bus, store, host) = fixture();
        let binder = Binder::new(&store, &host, ["count"], counter_view);
        binder.attach().unwrap();

        let (hits, hits_clone) = {
            let c = Rc::new(Cell::new(0));
            (c.clone(), c)
        };
        bus.subscribe(
            "custom:event",
            move |_| hits_clone.set(hits_clone.get() + 1),
            SubscribeOptions::default().owner(&binder.owner()),
        )
        .unwrap();

        binder.destroy();
        bus.emit("custom:event", Value::Null, Priority::Immediate)
            .unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_out_of_band_state_survives_rerender() {
        let (_bus, store, host) = fixture();
        store.initialize(Value::object_from([("count", Value::from(0))]));

        let binder = Binder::new(&store, &host, ["count"], counter_view);
        binder.attach().unwrap();

        let live = binder.live_root().unwrap();
        live.set_prop("focused", Value::from(true));

        store.set("count", 1).unwrap();
        assert_eq!(
            binder.live_root().unwrap().prop("focused"),
            Some(Value::from(true))
        );
    }
}
