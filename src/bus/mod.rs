//! Event bus - ownership-aware, priority-scheduled publish/subscribe.
//!
//! The bus decouples producers and consumers of named events while keeping
//! memory growth from abandoned subscriptions bounded. Three mechanisms do
//! the bounding: owner-based bulk cleanup ([`EventBus::cleanup_owner`]),
//! TTL/staleness sweeps ([`EventBus::sweep_stale`]), and capacity caps that
//! refuse registrations past a configured limit (reported on the
//! [`WARNING_EVENT`] channel, never as an error).
//!
//! # Scheduling
//!
//! Everything runs on one logical thread; delivery boundaries are explicit:
//!
//! - [`Priority::Immediate`] emissions dispatch synchronously inside `emit`.
//! - All other priorities join the pending batch. The batch drains at the
//!   next [`checkpoint`] when it contains a High emission (the microtask
//!   boundary), otherwise at the next [`tick`] (the macrotask boundary), or
//!   inline the moment it reaches [`BusConfig::max_batch`].
//! - A drained batch delivers in ascending priority order, emission order
//!   within a priority. Identical (event, payload) pairs emitted within the
//!   dedup window collapse to one delivery.
//!
//! A handler that panics is isolated: the panic is caught, logged with the
//! event name, and delivery continues with the remaining handlers.
//!
//! [`checkpoint`]: EventBus::checkpoint
//! [`tick`]: EventBus::tick
//!
//! # Example
//!
//! ```ignore
//! use ripple_ui::bus::{EventBus, Priority, SubscribeOptions};
//! use ripple_ui::value::Value;
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe("door:open", |e| println!("{:?}", e.payload),
//!     SubscribeOptions::default())?;
//!
//! bus.emit("door:open", Value::from("front"), Priority::Immediate)?;
//! sub.unsubscribe();
//! ```

mod registry;
mod scheduler;

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Deserialize;
use web_time::Instant;

use crate::error::BusError;
use crate::value::Value;

pub use registry::{ExpireCallback, Handler, HandlerId, OwnerToken};
use registry::Registry;
use scheduler::BatchQueue;

/// Event name that matches every emission.
pub const WILDCARD: &str = "*";

/// Warning channel for capacity refusals and leak flags.
pub const WARNING_EVENT: &str = "bus:warning";

/// Emitted synchronously at the start of every [`EventBus::tick`], before the
/// pending batch drains. Auto-flush hooks (such as the store's open write
/// batch) listen here.
pub const TICK_EVENT: &str = "bus:tick";

// =============================================================================
// Types
// =============================================================================

/// Delivery priority, ascending order of urgency loss. Lower sorts first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Dispatch synchronously inside `emit`.
    Immediate,
    /// Batched; promotes the batch flush to the next microtask checkpoint.
    High,
    #[default]
    Normal,
    Low,
    Idle,
}

/// A delivered event: name plus payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    pub name: String,
    pub payload: Value,
}

/// Options accepted by [`EventBus::subscribe`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Owner for bulk cleanup. The bus only keeps a weak reference.
    pub owner: Option<OwnerToken>,
    /// Ordering within the event's handler list.
    pub priority: Priority,
    /// Remove the registration after its first invocation.
    pub once: bool,
    /// Optional grouping label, useful for diagnostics.
    pub namespace: Option<String>,
    /// Registration self-cancels after this duration.
    pub ttl: Option<Duration>,
    /// Invoked when the TTL elapses and the registration is reaped.
    pub on_expire: Option<ExpireCallback>,
}

impl SubscribeOptions {
    pub fn owner(mut self, token: &OwnerToken) -> Self {
        self.owner = Some(token.clone());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn on_expire(mut self, cb: impl Fn() + 'static) -> Self {
        self.on_expire = Some(Rc::new(cb));
        self
    }
}

/// Bus limits and scheduling knobs. Loadable as policy data.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Registrations allowed per event name before refusal.
    pub max_handlers_per_event: usize,
    /// Registrations allowed across the whole bus before refusal.
    pub max_total_handlers: usize,
    /// Pending-batch size that triggers an inline flush.
    pub max_batch: usize,
    /// Window in which identical (event, payload) emissions collapse.
    pub dedup_window_ms: u64,
    /// When set, the sweep reaps handlers with no activity for this long.
    pub stale_after_ms: Option<u64>,
    /// Handler count per event considered anomalous by the leak detector.
    pub leak_threshold: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_handlers_per_event: 128,
            max_total_handlers: 2048,
            max_batch: 64,
            dedup_window_ms: 16,
            stale_after_ms: None,
            leak_threshold: 64,
        }
    }
}

impl BusConfig {
    fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }
}

/// One event name flagged by the leak detector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakReport {
    pub event: String,
    pub handlers: usize,
}

/// Diagnostic snapshot of one registration, in delivery order within its
/// event. Returned by [`EventBus::inspect`].
#[derive(Clone, Debug)]
pub struct RegistrationInfo {
    pub id: HandlerId,
    pub priority: Priority,
    pub once: bool,
    pub namespace: Option<String>,
    pub invocations: u64,
}

/// Handle for one registration. [`unsubscribe`](Subscription::unsubscribe) is
/// idempotent and takes effect immediately, even for emissions already queued
/// in the pending batch. Dropping the handle does NOT unsubscribe; lifetime
/// is governed by explicit removal, owner cleanup, TTL, or the sweep.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<RefCell<BusInner>>,
    event: String,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the registration. Returns whether it was still present.
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let removed = inner.borrow_mut().registry.remove(&self.event, self.id);
        removed.is_some()
    }
}

// =============================================================================
// EventBus
// =============================================================================

struct BusInner {
    registry: Registry,
    queue: BatchQueue,
    config: BusConfig,
    /// Re-entrancy guard: emissions during a flush join the next batch
    /// instead of recursing into another flush.
    flushing: bool,
}

/// The publish/subscribe bus. Cloning shares the same underlying bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        EventBus {
            inner: Rc::new(RefCell::new(BusInner {
                registry: Registry::new(),
                queue: BatchQueue::new(),
                config,
                flushing: false,
            })),
        }
    }

    // -------------------------------------------------------------------------
    // Subscribe / unsubscribe
    // -------------------------------------------------------------------------

    /// Register a handler for `event` (or [`WILDCARD`] for every emission).
    ///
    /// Fails on an empty event name, an empty namespace, or a zero TTL. A
    /// registration refused for capacity is NOT an error: a warning is
    /// published on [`WARNING_EVENT`] and the returned handle refers to
    /// nothing (its `unsubscribe` returns `false`).
    pub fn subscribe(
        &self,
        event: &str,
        handler: impl Fn(&Emission) + 'static,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        if event.is_empty() {
            return Err(BusError::EmptyEventName);
        }
        if options.namespace.as_deref() == Some("") {
            return Err(BusError::EmptyNamespace);
        }
        if options.ttl == Some(Duration::ZERO) {
            return Err(BusError::ZeroTtl);
        }

        let now = Instant::now();
        let mut inner = self.inner.borrow_mut();

        let per_event = inner.registry.count_for(event);
        let total = inner.registry.total();
        if per_event >= inner.config.max_handlers_per_event
            || total >= inner.config.max_total_handlers
        {
            let reason = if per_event >= inner.config.max_handlers_per_event {
                "handler-limit"
            } else {
                "total-limit"
            };
            tracing::warn!(event, reason, per_event, total, "registration refused");
            Self::publish_warning(&mut inner, reason, event, per_event.max(total), now);
            let id = inner.registry.reserve_id();
            drop(inner);
            return Ok(self.handle(event, id));
        }

        let id = inner.registry.insert(
            event,
            Rc::new(handler),
            options.owner.as_ref().map(|t| (t.id(), t.downgrade())),
            options.priority,
            options.once,
            options.namespace,
            options.ttl,
            options.on_expire,
            now,
        );

        // Leak heuristic: flag an event the moment it crosses the threshold.
        let count = inner.registry.count_for(event);
        if count == inner.config.leak_threshold {
            tracing::warn!(event, count, "event accumulating an anomalous handler count");
            Self::publish_warning(&mut inner, "leak-suspect", event, count, now);
        }

        drop(inner);
        Ok(self.handle(event, id))
    }

    /// Remove one registration by id. Returns whether one was found.
    pub fn unsubscribe(&self, event: &str, id: HandlerId) -> bool {
        self.inner
            .borrow_mut()
            .registry
            .remove(event, id)
            .is_some()
    }

    /// Remove every registration owned by `owner`, across all event names.
    /// Cost is proportional to that owner's registration count. Returns the
    /// number removed.
    pub fn cleanup_owner(&self, owner: &OwnerToken) -> usize {
        let removed = self.inner.borrow_mut().registry.remove_owner(owner.id());
        if removed > 0 {
            tracing::debug!(removed, "owner cleanup");
        }
        removed
    }

    /// Remove every registration and drop the pending batch. Manual reset.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.registry.clear();
        inner.queue.clear();
    }

    // -------------------------------------------------------------------------
    // Emit
    // -------------------------------------------------------------------------

    /// Publish `payload` under `event`.
    ///
    /// `Immediate` dispatches synchronously: by the time this returns, every
    /// matching handler has run (or failed and been isolated). Any other
    /// priority joins the pending batch; see the module docs for when the
    /// batch drains.
    pub fn emit(&self, event: &str, payload: Value, priority: Priority) -> Result<(), BusError> {
        if event.is_empty() {
            return Err(BusError::EmptyEventName);
        }

        let emission = Emission {
            name: event.to_string(),
            payload,
        };

        if priority == Priority::Immediate {
            self.dispatch(&emission);
            return Ok(());
        }

        let flush_now = {
            let mut inner = self.inner.borrow_mut();
            let window = inner.config.dedup_window();
            inner
                .queue
                .enqueue(emission, priority, Instant::now(), window);
            inner.queue.len() >= inner.config.max_batch && !inner.flushing
        };
        if flush_now {
            self.flush();
        }
        Ok(())
    }

    /// `emit` at the default (`Normal`) priority.
    pub fn emit_default(&self, event: &str, payload: Value) -> Result<(), BusError> {
        self.emit(event, payload, Priority::Normal)
    }

    // -------------------------------------------------------------------------
    // Scheduling boundaries
    // -------------------------------------------------------------------------

    /// Microtask boundary: drain the pending batch only if it contains a
    /// High-priority emission.
    pub fn checkpoint(&self) {
        let urgent = self.inner.borrow().queue.has_urgent();
        if urgent {
            self.flush();
        }
    }

    /// Macrotask boundary: publish [`TICK_EVENT`] to auto-flush hooks, drain
    /// the pending batch unconditionally, then run the staleness sweep.
    pub fn tick(&self) {
        self.dispatch(&Emission {
            name: TICK_EVENT.to_string(),
            payload: Value::Null,
        });
        self.flush();
        self.sweep_stale();
    }

    /// Force-drain the pending batch in delivery order. Emissions produced by
    /// handlers during the drain form the next batch.
    pub fn flush(&self) {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing || inner.queue.is_empty() {
                return;
            }
            inner.flushing = true;
            inner.queue.drain_sorted()
        };
        tracing::debug!(len = batch.len(), "flushing emission batch");
        for queued in &batch {
            self.dispatch(&queued.emission);
        }
        self.inner.borrow_mut().flushing = false;
    }

    // -------------------------------------------------------------------------
    // Memory safety
    // -------------------------------------------------------------------------

    /// Reap registrations whose owner is gone, whose TTL elapsed (their
    /// expiry callbacks run here), or - when `stale_after_ms` is configured -
    /// that have seen no activity within that window. Returns the number
    /// removed.
    pub fn sweep_stale(&self) -> usize {
        let now = Instant::now();
        let reapable = {
            let inner = self.inner.borrow();
            let stale_after = inner.config.stale_after();
            inner.registry.collect_reapable(now, stale_after)
        };
        if reapable.is_empty() {
            return 0;
        }

        let mut expire_callbacks = Vec::new();
        let mut removed = 0;
        {
            let mut inner = self.inner.borrow_mut();
            for (event, id) in reapable {
                if let Some(reg) = inner.registry.remove(&event, id) {
                    removed += 1;
                    if reg.expired(now) {
                        if let Some(cb) = reg.on_expire {
                            expire_callbacks.push(cb);
                        }
                    }
                }
            }
        }
        for cb in expire_callbacks {
            cb();
        }
        tracing::debug!(removed, "staleness sweep");
        removed
    }

    /// Event names whose handler count meets the configured leak threshold.
    pub fn detect_leaks(&self) -> Vec<LeakReport> {
        let inner = self.inner.borrow();
        inner
            .registry
            .over_threshold(inner.config.leak_threshold)
            .into_iter()
            .map(|(event, handlers)| LeakReport { event, handlers })
            .collect()
    }

    /// Diagnostic snapshot of the registrations for one event name, in
    /// delivery order.
    pub fn inspect(&self, event: &str) -> Vec<RegistrationInfo> {
        self.inner
            .borrow()
            .registry
            .for_event(event)
            .iter()
            .map(|r| RegistrationInfo {
                id: r.id,
                priority: r.priority,
                once: r.once,
                namespace: r.namespace.clone(),
                invocations: r.invocation_count,
            })
            .collect()
    }

    /// Registrations currently held for one event name.
    pub fn handler_count(&self, event: &str) -> usize {
        self.inner.borrow().registry.count_for(event)
    }

    /// Registrations currently held across the whole bus.
    pub fn total_handlers(&self) -> usize {
        self.inner.borrow().registry.total()
    }

    /// Emissions waiting in the pending batch.
    pub fn pending_emissions(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn handle(&self, event: &str, id: HandlerId) -> Subscription {
        Subscription {
            bus: Rc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    fn publish_warning(
        inner: &mut BusInner,
        reason: &str,
        event: &str,
        count: usize,
        now: Instant,
    ) {
        let payload = Value::object_from([
            ("reason", Value::from(reason)),
            ("event", Value::from(event)),
            ("count", Value::from(count as i64)),
        ]);
        let window = inner.config.dedup_window();
        inner.queue.enqueue(
            Emission {
                name: WARNING_EVENT.to_string(),
                payload,
            },
            Priority::High,
            now,
            window,
        );
    }

    /// Deliver one emission to its handlers: exact-name registrations merged
    /// with wildcard registrations, ordered by (priority, insertion).
    fn dispatch(&self, emission: &Emission) {
        let now = Instant::now();

        // Snapshot under the borrow, invoke outside it: handlers are allowed
        // to subscribe, unsubscribe, and emit re-entrantly.
        let snapshot: Vec<(String, HandlerId, Handler, bool)> = {
            let inner = self.inner.borrow();
            let mut merged: Vec<(&str, &registry::Registration)> = inner
                .registry
                .for_event(&emission.name)
                .iter()
                .map(|r| (emission.name.as_str(), r))
                .collect();
            if emission.name != WILDCARD {
                merged.extend(
                    inner
                        .registry
                        .for_event(WILDCARD)
                        .iter()
                        .map(|r| (WILDCARD, r)),
                );
            }
            merged.sort_by_key(|(_, r)| (r.priority, r.seq));
            merged
                .into_iter()
                .map(|(key, r)| (key.to_string(), r.id, Rc::clone(&r.handler), r.once))
                .collect()
        };

        for (key, id, handler, once) in snapshot {
            enum Action {
                Skip,
                Run,
                Expire(Option<ExpireCallback>),
            }

            let action = {
                let mut inner = self.inner.borrow_mut();
                match inner.registry.get_mut(&key, id) {
                    None => Action::Skip, // removed since it was queued
                    Some(reg) if reg.expired(now) => {
                        let cb = reg.on_expire.clone();
                        inner.registry.remove(&key, id);
                        Action::Expire(cb)
                    }
                    Some(reg) => {
                        reg.last_invoked_at = Some(now);
                        reg.invocation_count += 1;
                        Action::Run
                    }
                }
            };

            match action {
                Action::Skip => {}
                Action::Expire(cb) => {
                    if let Some(cb) = cb {
                        cb();
                    }
                }
                Action::Run => {
                    // Isolate handler failures: one failing handler must not
                    // starve the rest of the delivery.
                    let result = catch_unwind(AssertUnwindSafe(|| handler(emission)));
                    if result.is_err() {
                        tracing::error!(event = %emission.name, "handler panicked during emission");
                    }
                    if once {
                        self.inner.borrow_mut().registry.remove(&key, id);
                    }
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, impl Fn(&Emission) + 'static) {
        let count = Rc::new(Cell::new(0));
        let clone = count.clone();
        (count, move |_: &Emission| clone.set(clone.get() + 1))
    }

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Emission) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let clone = seen.clone();
        (seen, move |e: &Emission| {
            clone.borrow_mut().push(e.payload.clone())
        })
    }

    #[test]
    fn test_immediate_dispatch_is_synchronous() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_empty_event_name_rejected() {
        let bus = EventBus::new();
        assert_eq!(
            bus.subscribe("", |_| {}, SubscribeOptions::default())
                .unwrap_err(),
            BusError::EmptyEventName
        );
        assert_eq!(
            bus.emit("", Value::Null, Priority::Immediate).unwrap_err(),
            BusError::EmptyEventName
        );
    }

    #[test]
    fn test_queued_until_flush() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Normal).unwrap();
        assert_eq!(count.get(), 0);

        bus.flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_flush_order_priority_then_emission_order() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::from(1), Priority::Low).unwrap();
        bus.emit("x", Value::from(2), Priority::High).unwrap();
        bus.emit("x", Value::from(3), Priority::Low).unwrap();
        bus.flush();

        assert_eq!(
            *seen.borrow(),
            vec![Value::from(2), Value::from(1), Value::from(3)]
        );
    }

    #[test]
    fn test_checkpoint_flushes_only_when_urgent() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::from(1), Priority::Normal).unwrap();
        bus.checkpoint();
        assert_eq!(count.get(), 0); // no High emission queued

        bus.emit("x", Value::from(2), Priority::High).unwrap();
        bus.checkpoint();
        assert_eq!(count.get(), 2); // whole batch drained
    }

    #[test]
    fn test_tick_flushes_everything() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Idle).unwrap();
        bus.tick();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_batch_cap_flushes_inline() {
        let bus = EventBus::with_config(BusConfig {
            max_batch: 3,
            dedup_window_ms: 0,
            ..BusConfig::default()
        });
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::from(1), Priority::Normal).unwrap();
        bus.emit("x", Value::from(2), Priority::Normal).unwrap();
        assert_eq!(count.get(), 0);
        bus.emit("x", Value::from(3), Priority::Normal).unwrap();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_dedup_collapses_to_single_delivery() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::from(7), Priority::Normal).unwrap();
        bus.emit("x", Value::from(7), Priority::Normal).unwrap();
        bus.flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_handler_failure_is_isolated() {
        let bus = EventBus::new();
        bus.subscribe("x", |_| panic!("boom"), SubscribeOptions::default())
            .unwrap();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 1);
        // Both registrations survive; emission is not retried.
        assert_eq!(bus.handler_count("x"), 2);
    }

    #[test]
    fn test_handler_priority_order_within_event() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for (label, priority) in [("low", Priority::Low), ("high", Priority::High)] {
            let clone = seen.clone();
            bus.subscribe(
                "x",
                move |_| clone.borrow_mut().push(label),
                SubscribeOptions::default().priority(priority),
            )
            .unwrap();
        }

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(*seen.borrow(), vec!["high", "low"]);
    }

    #[test]
    fn test_wildcard_receives_everything() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe(WILDCARD, handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("a", Value::Null, Priority::Immediate).unwrap();
        bus.emit("b", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_once() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("x", handler, SubscribeOptions::default().once())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(bus.handler_count("x"), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        let sub = bus
            .subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_unsubscribe_mid_batch_prevents_delivery() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        let sub = bus
            .subscribe("x", handler, SubscribeOptions::default())
            .unwrap();

        bus.emit("x", Value::Null, Priority::Normal).unwrap();
        sub.unsubscribe(); // already queued, must still not fire
        bus.flush();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_cleanup_owner_removes_all_and_only_that_owner() {
        let bus = EventBus::new();
        let mine = OwnerToken::new();
        let theirs = OwnerToken::new();

        let (my_count, my_handler) = counter();
        let (their_count, their_handler) = counter();
        bus.subscribe("x", my_handler, SubscribeOptions::default().owner(&mine))
            .unwrap();
        bus.subscribe(
            "x",
            their_handler,
            SubscribeOptions::default().owner(&theirs),
        )
        .unwrap();

        assert_eq!(bus.cleanup_owner(&mine), 1);
        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(my_count.get(), 0);
        assert_eq!(their_count.get(), 1);
    }

    #[test]
    fn test_capacity_refusal_warns_instead_of_failing() {
        let bus = EventBus::with_config(BusConfig {
            max_handlers_per_event: 1,
            ..BusConfig::default()
        });
        let (warnings, warning_handler) = recorder();
        bus.subscribe(WARNING_EVENT, warning_handler, SubscribeOptions::default())
            .unwrap();

        bus.subscribe("x", |_| {}, SubscribeOptions::default())
            .unwrap();
        let refused = bus
            .subscribe("x", |_| {}, SubscribeOptions::default())
            .unwrap();

        assert_eq!(bus.handler_count("x"), 1);
        assert!(!refused.unsubscribe()); // refers to nothing

        bus.flush();
        let warnings = warnings.borrow();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].get("reason").and_then(Value::as_str),
            Some("handler-limit")
        );
    }

    #[test]
    fn test_ttl_expiry_with_callback() {
        let bus = EventBus::new();
        let expired = Rc::new(Cell::new(false));
        let expired_clone = expired.clone();
        let (count, handler) = counter();

        bus.subscribe(
            "x",
            handler,
            SubscribeOptions::default()
                .ttl(Duration::from_millis(5))
                .on_expire(move || expired_clone.set(true)),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(10));
        bus.sweep_stale();

        assert!(expired.get());
        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_sweep_reaps_dropped_owner() {
        let bus = EventBus::new();
        let token = OwnerToken::new();
        bus.subscribe("x", |_| {}, SubscribeOptions::default().owner(&token))
            .unwrap();

        drop(token);
        assert_eq!(bus.sweep_stale(), 1);
        assert_eq!(bus.total_handlers(), 0);
    }

    #[test]
    fn test_detect_leaks() {
        let bus = EventBus::with_config(BusConfig {
            leak_threshold: 3,
            ..BusConfig::default()
        });
        for _ in 0..3 {
            bus.subscribe("busy", |_| {}, SubscribeOptions::default())
                .unwrap();
        }
        bus.subscribe("quiet", |_| {}, SubscribeOptions::default())
            .unwrap();

        let reports = bus.detect_leaks();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].event, "busy");
        assert_eq!(reports[0].handlers, 3);
    }

    #[test]
    fn test_emit_during_flush_joins_next_batch() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.subscribe("second", handler, SubscribeOptions::default())
            .unwrap();

        let bus_clone = bus.clone();
        bus.subscribe(
            "first",
            move |_| {
                bus_clone
                    .emit("second", Value::Null, Priority::Normal)
                    .unwrap();
            },
            SubscribeOptions::default(),
        )
        .unwrap();

        bus.emit("first", Value::Null, Priority::Normal).unwrap();
        bus.flush();
        assert_eq!(count.get(), 0); // queued during the flush

        bus.flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_inspect_reports_metadata() {
        let bus = EventBus::new();
        bus.subscribe(
            "x",
            |_| {},
            SubscribeOptions::default().namespace("widgets").once(),
        )
        .unwrap();

        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        assert!(bus.inspect("x").is_empty()); // once-handler already removed

        bus.subscribe("x", |_| {}, SubscribeOptions::default())
            .unwrap();
        bus.emit("x", Value::Null, Priority::Immediate).unwrap();
        bus.emit("x", Value::Null, Priority::Immediate).unwrap();

        let info = bus.inspect("x");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].invocations, 2);
        assert_eq!(info[0].namespace, None);
    }

    #[test]
    fn test_validation_of_options() {
        let bus = EventBus::new();
        assert_eq!(
            bus.subscribe("x", |_| {}, SubscribeOptions::default().namespace(""))
                .unwrap_err(),
            BusError::EmptyNamespace
        );
        assert_eq!(
            bus.subscribe("x", |_| {}, SubscribeOptions::default().ttl(Duration::ZERO))
                .unwrap_err(),
            BusError::ZeroTtl
        );
    }
}
