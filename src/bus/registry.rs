//! Handler registrations and the owner back-reference index.
//!
//! Each subscription becomes a [`Registration`]: the handler plus its
//! scheduling and lifetime metadata. Per event name, registrations are kept
//! ordered by priority (stable by insertion within a priority). A parallel
//! owner index maps an owner to its (event, id) pairs so bulk removal is
//! proportional to that owner's registration count, never the whole registry.
//!
//! Owners are identified by an [`OwnerToken`]. The registry only ever holds a
//! `Weak` downgrade of the token, so a component that drops its token is
//! reclaimed normally - the bus is never the thing keeping an owner alive.

use std::rc::{Rc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use web_time::Instant;

use super::{Emission, Priority};

/// Shared handler callable.
pub type Handler = Rc<dyn Fn(&Emission)>;

/// Callback invoked when a TTL registration expires.
pub type ExpireCallback = Rc<dyn Fn()>;

// =============================================================================
// Owner identity
// =============================================================================

/// Identity token for subscription ownership.
///
/// A component that wants its subscriptions bulk-removable holds one token and
/// passes it in its subscribe options. Clones share identity. Dropping every
/// clone lets the staleness sweep reap the registrations on its own.
#[derive(Clone, Debug)]
pub struct OwnerToken(Rc<()>);

impl OwnerToken {
    pub fn new() -> Self {
        OwnerToken(Rc::new(()))
    }

    pub(crate) fn id(&self) -> OwnerId {
        OwnerId(Rc::as_ptr(&self.0) as usize)
    }

    pub(crate) fn downgrade(&self) -> Weak<()> {
        Rc::downgrade(&self.0)
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Address-based owner key for the back-reference index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct OwnerId(usize);

// =============================================================================
// Registration
// =============================================================================

/// Identifier for one registration, unique for the lifetime of a bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// One subscription's handler and metadata.
pub(crate) struct Registration {
    pub id: HandlerId,
    pub handler: Handler,
    /// Non-owning back-reference to the owner, if any.
    pub owner: Option<(OwnerId, Weak<()>)>,
    pub priority: Priority,
    pub once: bool,
    pub namespace: Option<String>,
    pub ttl: Option<Duration>,
    pub on_expire: Option<ExpireCallback>,
    pub added_at: Instant,
    pub last_invoked_at: Option<Instant>,
    pub invocation_count: u64,
    /// Global insertion sequence; the stable tiebreak within a priority.
    pub seq: u64,
}

impl Registration {
    /// True once the TTL has elapsed.
    pub fn expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.added_at) >= ttl,
            None => false,
        }
    }

    /// True when the owner token has been dropped.
    pub fn owner_gone(&self) -> bool {
        match &self.owner {
            Some((_, weak)) => weak.upgrade().is_none(),
            None => false,
        }
    }

    /// True when the handler has seen no activity within `timeout`.
    /// "Activity" is the last invocation, or registration time if never run.
    pub fn stale(&self, now: Instant, timeout: Duration) -> bool {
        let last = self.last_invoked_at.unwrap_or(self.added_at);
        now.duration_since(last) >= timeout
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Event name → ordered registrations, plus the owner back-reference index.
#[derive(Default)]
pub(crate) struct Registry {
    events: AHashMap<String, Vec<Registration>>,
    by_owner: AHashMap<OwnerId, Vec<(String, HandlerId)>>,
    next_id: u64,
    next_seq: u64,
    total: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next registration id without inserting anything.
    /// Used for capacity-refused subscriptions, whose returned handle must
    /// still carry a unique (never-registered) id.
    pub fn reserve_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a registration, keeping the event's list sorted by priority
    /// (stable within a priority by insertion order).
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        event: &str,
        handler: Handler,
        owner: Option<(OwnerId, Weak<()>)>,
        priority: Priority,
        once: bool,
        namespace: Option<String>,
        ttl: Option<Duration>,
        on_expire: Option<ExpireCallback>,
        now: Instant,
    ) -> HandlerId {
        let id = self.reserve_id();
        let seq = self.next_seq;
        self.next_seq += 1;

        let registration = Registration {
            id,
            handler,
            owner: owner.clone(),
            priority,
            once,
            namespace,
            ttl,
            on_expire,
            added_at: now,
            last_invoked_at: None,
            invocation_count: 0,
            seq,
        };

        let list = self.events.entry(event.to_string()).or_default();
        let pos = list
            .iter()
            .position(|r| r.priority > priority)
            .unwrap_or(list.len());
        list.insert(pos, registration);
        self.total += 1;

        if let Some((owner_id, _)) = owner {
            self.by_owner
                .entry(owner_id)
                .or_default()
                .push((event.to_string(), id));
        }
        id
    }

    /// Remove one registration. Returns the removed entry, if found.
    pub fn remove(&mut self, event: &str, id: HandlerId) -> Option<Registration> {
        let list = self.events.get_mut(event)?;
        let pos = list.iter().position(|r| r.id == id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.events.remove(event);
        }
        self.total -= 1;

        if let Some((owner_id, _)) = &removed.owner {
            if let Some(entries) = self.by_owner.get_mut(owner_id) {
                entries.retain(|(_, eid)| *eid != id);
                if entries.is_empty() {
                    self.by_owner.remove(owner_id);
                }
            }
        }
        Some(removed)
    }

    /// Remove every registration for an owner. Cost is proportional to that
    /// owner's registration count.
    pub fn remove_owner(&mut self, owner: OwnerId) -> usize {
        let Some(entries) = self.by_owner.remove(&owner) else {
            return 0;
        };
        let mut removed = 0;
        for (event, id) in entries {
            if let Some(list) = self.events.get_mut(&event) {
                if let Some(pos) = list.iter().position(|r| r.id == id) {
                    list.remove(pos);
                    self.total -= 1;
                    removed += 1;
                }
                if list.is_empty() {
                    self.events.remove(&event);
                }
            }
        }
        removed
    }

    pub fn get_mut(&mut self, event: &str, id: HandlerId) -> Option<&mut Registration> {
        self.events
            .get_mut(event)?
            .iter_mut()
            .find(|r| r.id == id)
    }

    /// Registrations for one event name, in delivery order.
    pub fn for_event(&self, event: &str) -> &[Registration] {
        self.events.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count_for(&self, event: &str) -> usize {
        self.events.get(event).map(Vec::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Collect (event, id) pairs of registrations that should be reaped:
    /// dead owner, elapsed TTL, or no activity within `stale_after`.
    pub fn collect_reapable(
        &self,
        now: Instant,
        stale_after: Option<Duration>,
    ) -> Vec<(String, HandlerId)> {
        let mut reapable = Vec::new();
        for (event, list) in &self.events {
            for r in list {
                let dead = r.owner_gone()
                    || r.expired(now)
                    || stale_after.is_some_and(|t| r.stale(now, t));
                if dead {
                    reapable.push((event.clone(), r.id));
                }
            }
        }
        reapable
    }

    /// Event names whose registration count meets or exceeds `threshold`.
    pub fn over_threshold(&self, threshold: usize) -> Vec<(String, usize)> {
        self.events
            .iter()
            .filter(|(_, list)| list.len() >= threshold)
            .map(|(event, list)| (event.clone(), list.len()))
            .collect()
    }

    /// Clear everything (manual reset).
    pub fn clear(&mut self) {
        self.events.clear();
        self.by_owner.clear();
        self.total = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Rc::new(|_| {})
    }

    fn insert_simple(reg: &mut Registry, event: &str, priority: Priority) -> HandlerId {
        reg.insert(
            event,
            noop(),
            None,
            priority,
            false,
            None,
            None,
            None,
            Instant::now(),
        )
    }

    #[test]
    fn test_priority_ordering_stable() {
        let mut reg = Registry::new();
        let low = insert_simple(&mut reg, "x", Priority::Low);
        let high = insert_simple(&mut reg, "x", Priority::High);
        let normal_a = insert_simple(&mut reg, "x", Priority::Normal);
        let normal_b = insert_simple(&mut reg, "x", Priority::Normal);

        let order: Vec<HandlerId> = reg.for_event("x").iter().map(|r| r.id).collect();
        assert_eq!(order, vec![high, normal_a, normal_b, low]);
    }

    #[test]
    fn test_remove() {
        let mut reg = Registry::new();
        let id = insert_simple(&mut reg, "x", Priority::Normal);
        assert_eq!(reg.count_for("x"), 1);
        assert!(reg.remove("x", id).is_some());
        assert!(reg.remove("x", id).is_none());
        assert_eq!(reg.count_for("x"), 0);
        assert_eq!(reg.total(), 0);
    }

    #[test]
    fn test_owner_index_bulk_removal() {
        let mut reg = Registry::new();
        let token = OwnerToken::new();
        let other = OwnerToken::new();

        for event in ["a", "b", "c"] {
            reg.insert(
                event,
                noop(),
                Some((token.id(), token.downgrade())),
                Priority::Normal,
                false,
                None,
                None,
                None,
                Instant::now(),
            );
        }
        let kept = reg.insert(
            "a",
            noop(),
            Some((other.id(), other.downgrade())),
            Priority::Normal,
            false,
            None,
            None,
            None,
            Instant::now(),
        );

        assert_eq!(reg.remove_owner(token.id()), 3);
        assert_eq!(reg.total(), 1);
        assert!(reg.for_event("a").iter().any(|r| r.id == kept));
        // Second removal is a no-op.
        assert_eq!(reg.remove_owner(token.id()), 0);
    }

    #[test]
    fn test_owner_token_is_non_owning() {
        let mut reg = Registry::new();
        let token = OwnerToken::new();
        reg.insert(
            "x",
            noop(),
            Some((token.id(), token.downgrade())),
            Priority::Normal,
            false,
            None,
            None,
            None,
            Instant::now(),
        );

        drop(token);
        let reapable = reg.collect_reapable(Instant::now(), None);
        assert_eq!(reapable.len(), 1);
        assert_eq!(reapable[0].0, "x");
    }

    #[test]
    fn test_ttl_expiry() {
        let mut reg = Registry::new();
        let start = Instant::now();
        reg.insert(
            "x",
            noop(),
            None,
            Priority::Normal,
            false,
            None,
            Some(Duration::from_millis(10)),
            None,
            start,
        );

        assert!(reg.collect_reapable(start, None).is_empty());
        let later = start + Duration::from_millis(11);
        assert_eq!(reg.collect_reapable(later, None).len(), 1);
    }

    #[test]
    fn test_staleness() {
        let mut reg = Registry::new();
        let start = Instant::now();
        let id = reg.insert(
            "x",
            noop(),
            None,
            Priority::Normal,
            false,
            None,
            None,
            None,
            start,
        );

        let later = start + Duration::from_secs(60);
        assert!(
            reg.collect_reapable(later, Some(Duration::from_secs(30)))
                .len()
                == 1
        );

        // Recent invocation resets the staleness clock.
        reg.get_mut("x", id).unwrap().last_invoked_at = Some(later);
        assert!(
            reg.collect_reapable(later, Some(Duration::from_secs(30)))
                .is_empty()
        );
    }

    #[test]
    fn test_over_threshold() {
        let mut reg = Registry::new();
        for _ in 0..5 {
            insert_simple(&mut reg, "busy", Priority::Normal);
        }
        insert_simple(&mut reg, "quiet", Priority::Normal);

        let flagged = reg.over_threshold(5);
        assert_eq!(flagged, vec![("busy".to_string(), 5)]);
    }
}
