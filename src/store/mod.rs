//! State store - the single authoritative application-state container.
//!
//! The store holds one [`Value`] tree addressed by dot-delimited paths. Every
//! read returns an isolated clone (cheap, thanks to the value type's
//! copy-on-write sharing); the tree itself mutates only inside
//! [`set`](Store::set) / [`update`](Store::update) / [`initialize`](Store::initialize).
//!
//! # Change notification
//!
//! Writes publish on the event bus: a single `set` publishes
//! [`CHANGED_EVENT`] with `{path, value}`, and a multi-key `update` or a
//! closed write batch publishes exactly one [`BATCH_CHANGED_EVENT`] carrying
//! every changed path - subscribers never observe per-key notifications for a
//! multi-key write. Both are dispatched at `Immediate` priority, so path
//! subscribers run synchronously before the write call returns.
//!
//! Path subscriptions are themselves bus registrations. That is deliberate:
//! a component that registers its store subscriptions under its
//! [`OwnerToken`] gets them torn down by `EventBus::cleanup_owner` along with
//! everything else it owns.
//!
//! # Batching
//!
//! [`start_batch`](Store::start_batch) opens a coalescing scope: `set` calls
//! accumulate (last write per path wins) instead of applying.
//! [`end_batch`](Store::end_batch) applies them all and publishes one batch
//! notification. A batch left open auto-flushes on the next bus tick.

mod path;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::bus::{
    EventBus, OwnerToken, Priority, SubscribeOptions, Subscription, TICK_EVENT,
};
use crate::error::StoreError;
use crate::value::Value;

pub use path::overlaps;

/// Published after every applied single-path write: `{path, value}`.
pub const CHANGED_EVENT: &str = "state:changed";

/// Published once per applied multi-path write: `{paths, changes}`.
pub const BATCH_CHANGED_EVENT: &str = "state:batch-changed";

// =============================================================================
// Store
// =============================================================================

struct BatchState {
    /// First-write order of paths; the map below holds the winning value.
    order: Vec<String>,
    pending: ahash::AHashMap<String, Value>,
    depth: usize,
}

impl BatchState {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            pending: ahash::AHashMap::new(),
            depth: 1,
        }
    }

    fn put(&mut self, path: &str, value: Value) {
        if !self.pending.contains_key(path) {
            self.order.push(path.to_string());
        }
        self.pending.insert(path.to_string(), value);
    }

    fn into_changes(self) -> Vec<(String, Value)> {
        let BatchState {
            order, mut pending, ..
        } = self;
        order
            .into_iter()
            .filter_map(|p| pending.remove(&p).map(|v| (p, v)))
            .collect()
    }
}

struct StoreInner {
    root: Value,
    batch: Option<BatchState>,
    bus: EventBus,
    /// Keeps the tick auto-flush registration alive for the store's
    /// lifetime; dropping the store lets the bus sweep reap it.
    _owner: OwnerToken,
}

/// The hierarchical state container. Cloning shares the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Store {
    /// Create a store broadcasting on `bus`, with an empty mapping as root.
    pub fn new(bus: &EventBus) -> Self {
        let owner = OwnerToken::new();
        let inner = Rc::new(RefCell::new(StoreInner {
            root: Value::object(),
            batch: None,
            bus: bus.clone(),
            _owner: owner.clone(),
        }));

        // Auto-flush an open batch on the macrotask tick.
        let weak = Rc::downgrade(&inner);
        let store = Store { inner };
        let _ = bus.subscribe(
            TICK_EVENT,
            move |_| {
                if let Some(inner) = weak.upgrade() {
                    let open = inner.borrow().batch.is_some();
                    if open {
                        tracing::debug!("auto-flushing open store batch on tick");
                        Store { inner }.flush_batch();
                    }
                }
            },
            SubscribeOptions::default().owner(&owner),
        );
        store
    }

    /// The bus this store broadcasts on.
    pub fn bus(&self) -> EventBus {
        self.inner.borrow().bus.clone()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Clone of the entire tree. Mutating the clone never affects the store.
    pub fn snapshot(&self) -> Value {
        self.inner.borrow().root.clone()
    }

    /// Clone of the value at `path`, or `None` if any segment is absent.
    pub fn get(&self, path: &str) -> Option<Value> {
        let inner = self.inner.borrow();
        value_at(&inner.root, path)
    }

    /// The tree as JSON, for persistence collaborators.
    pub fn export_json(&self) -> serde_json::Value {
        serde_json::Value::from(&self.inner.borrow().root)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Replace the entire tree with a copy of `seed`, discarding any prior
    /// content and any open batch.
    pub fn initialize(&self, seed: Value) {
        let mut inner = self.inner.borrow_mut();
        inner.root = seed;
        inner.batch = None;
    }

    /// `initialize` from JSON. Fails with [`StoreError::Structural`] on
    /// pathologically deep seeds.
    pub fn initialize_json(&self, seed: &serde_json::Value) -> Result<(), StoreError> {
        let value = Value::try_from(seed)?;
        self.initialize(value);
        Ok(())
    }

    /// Write `value` at `path`, creating intermediate mapping nodes for any
    /// missing segment. Publishes one [`CHANGED_EVENT`] and notifies matching
    /// path subscribers before returning - unless a batch is open, in which
    /// case the write is deferred into it (last write per path wins).
    ///
    /// Writing through a non-mapping intermediate silently replaces it with a
    /// mapping. That is intentionally permissive; see the crate docs.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        path::validate(path)?;
        let value = value.into();

        let deferred = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.batch {
                Some(batch) => {
                    batch.put(path, value.clone());
                    true
                }
                None => {
                    apply_set(&mut inner.root, path, value.clone());
                    false
                }
            }
        };

        if !deferred {
            let payload = Value::object_from([
                ("path", Value::from(path)),
                ("value", value),
            ]);
            let _ = self
                .bus()
                .emit(CHANGED_EVENT, payload, Priority::Immediate);
        }
        Ok(())
    }

    /// Apply every entry as in [`set`](Store::set), but publish exactly one
    /// [`BATCH_CHANGED_EVENT`] carrying all changed paths; each matching
    /// subscriber is notified once. Inside an open batch the entries are
    /// deferred like any other write.
    pub fn update<K, I>(&self, entries: I) -> Result<(), StoreError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let entries: Vec<(String, Value)> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (path, _) in &entries {
            path::validate(path)?;
        }

        let deferred = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.batch {
                Some(batch) => {
                    for (path, value) in &entries {
                        batch.put(path, value.clone());
                    }
                    true
                }
                None => {
                    for (path, value) in &entries {
                        apply_set(&mut inner.root, path, value.clone());
                    }
                    false
                }
            }
        };

        if !deferred && !entries.is_empty() {
            self.publish_batch(&entries);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Batching
    // -------------------------------------------------------------------------

    /// Open a write-coalescing scope. Nested calls stack; the batch applies
    /// when the outermost scope closes (or on the next bus tick if it never
    /// does).
    pub fn start_batch(&self) {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.batch {
            Some(batch) => batch.depth += 1,
            None => inner.batch = Some(BatchState::new()),
        }
    }

    /// Close the current scope; the outermost close applies every deferred
    /// write and publishes one batch notification.
    pub fn end_batch(&self) {
        let flush = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.batch {
                Some(batch) if batch.depth > 1 => {
                    batch.depth -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        if flush {
            self.flush_batch();
        }
    }

    /// True while a batch scope is open.
    pub fn batch_open(&self) -> bool {
        self.inner.borrow().batch.is_some()
    }

    fn flush_batch(&self) {
        let changes = {
            let mut inner = self.inner.borrow_mut();
            let Some(batch) = inner.batch.take() else {
                return;
            };
            let changes = batch.into_changes();
            for (path, value) in &changes {
                apply_set(&mut inner.root, path, value.clone());
            }
            changes
        };
        if !changes.is_empty() {
            self.publish_batch(&changes);
        }
    }

    fn publish_batch(&self, changes: &[(String, Value)]) {
        let paths = Value::array_from(changes.iter().map(|(p, _)| Value::from(p.as_str())));
        let entries = Value::array_from(changes.iter().map(|(p, v)| {
            Value::object_from([("path", Value::from(p.as_str())), ("value", v.clone())])
        }));
        let payload = Value::object_from([("paths", paths), ("changes", entries)]);
        let _ = self
            .bus()
            .emit(BATCH_CHANGED_EVENT, payload, Priority::Immediate);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe `callback` to changes at `path`: it fires when the changed
    /// path equals, sits below, or sits above the subscribed path, and
    /// receives a clone of the (post-write) value at `path` - `Value::Null`
    /// when the path no longer resolves.
    pub fn subscribe(
        &self,
        path: &str,
        callback: impl Fn(&Value) + 'static,
    ) -> Result<StoreSubscription, StoreError> {
        self.subscribe_inner(path, Rc::new(callback), None)
    }

    /// As [`subscribe`](Store::subscribe), registering under `owner` so that
    /// `EventBus::cleanup_owner` removes the subscription.
    pub fn subscribe_owned(
        &self,
        path: &str,
        callback: impl Fn(&Value) + 'static,
        owner: &OwnerToken,
    ) -> Result<StoreSubscription, StoreError> {
        self.subscribe_inner(path, Rc::new(callback), Some(owner.clone()))
    }

    fn subscribe_inner(
        &self,
        path: &str,
        callback: Rc<dyn Fn(&Value)>,
        owner: Option<OwnerToken>,
    ) -> Result<StoreSubscription, StoreError> {
        path::validate(path)?;
        let bus = self.bus();
        let options = match &owner {
            Some(token) => SubscribeOptions::default().owner(token),
            None => SubscribeOptions::default(),
        };

        let sub_path = path.to_string();
        let weak = Rc::downgrade(&self.inner);
        let cb = Rc::clone(&callback);
        let changed = bus.subscribe(
            CHANGED_EVENT,
            move |emission| {
                let Some(changed_path) = emission.payload.get("path").and_then(Value::as_str)
                else {
                    return;
                };
                if path::overlaps(changed_path, &sub_path) {
                    notify(&weak, &sub_path, &cb);
                }
            },
            options.clone(),
        )?;

        let sub_path = path.to_string();
        let weak = Rc::downgrade(&self.inner);
        let batched = bus.subscribe(
            BATCH_CHANGED_EVENT,
            move |emission| {
                let Some(Value::Array(paths)) = emission.payload.get("paths").cloned() else {
                    return;
                };
                let hit = paths
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|p| path::overlaps(p, &sub_path));
                if hit {
                    notify(&weak, &sub_path, &callback);
                }
            },
            options,
        )?;

        Ok(StoreSubscription { changed, batched })
    }
}

/// Invoke a path subscriber with the current value at its path.
fn notify(inner: &Weak<RefCell<StoreInner>>, path: &str, callback: &Rc<dyn Fn(&Value)>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let value = {
        let inner = inner.borrow();
        value_at(&inner.root, path).unwrap_or(Value::Null)
    };
    callback(&value);
}

/// Handle for one path subscription. Unsubscribing is idempotent.
pub struct StoreSubscription {
    changed: Subscription,
    batched: Subscription,
}

impl StoreSubscription {
    /// Remove the subscription. Returns whether it was still present.
    pub fn unsubscribe(&self) -> bool {
        let was_present = self.changed.unsubscribe();
        self.batched.unsubscribe();
        was_present
    }
}

// =============================================================================
// Tree navigation
// =============================================================================

/// Navigate `path` through the tree: mapping segments by key, sequence
/// segments by index. `None` if any segment fails to resolve.
fn value_at(root: &Value, path: &str) -> Option<Value> {
    let mut node = root;
    for seg in path::segments(path) {
        node = match node {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node.clone())
}

/// Write `value` at `path`, creating mapping intermediates as needed.
/// A non-mapping intermediate is replaced by a mapping (permissive).
fn apply_set(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path::segments(path).collect();
    let mut node = root;
    let mut value = Some(value);

    for (i, seg) in segments.iter().enumerate() {
        if !node.is_object() {
            if !node.is_null() {
                tracing::debug!(path, kind = node.kind(), "replacing non-mapping node on write");
            }
            *node = Value::object();
        }
        let Value::Object(map) = node else {
            unreachable!("node was just made a mapping");
        };
        let map = Rc::make_mut(map);

        if i + 1 == segments.len() {
            map.insert(seg.to_string(), value.take().unwrap_or_default());
            return;
        }
        node = map.entry(seg.to_string()).or_insert(Value::Null);
    }
}

// =============================================================================
// Tests
// =============================================================================
