//! Pending-emission queue with priority ordering and deduplication.
//!
//! Non-immediate emissions accumulate here until a scheduling boundary drains
//! them. The drain order is ascending priority, stable by enqueue sequence
//! within a priority, so equal-priority emissions are delivered in emission
//! order. An identical (event, payload) pair enqueued within the dedup window
//! collapses into the already-queued delivery.

use std::time::Duration;

use web_time::Instant;

use super::{Emission, Priority};

/// One queued emission awaiting a flush.
pub(crate) struct QueuedEmission {
    pub emission: Emission,
    pub priority: Priority,
    pub seq: u64,
    pub queued_at: Instant,
}

/// The pending batch.
#[derive(Default)]
pub(crate) struct BatchQueue {
    pending: Vec<QueuedEmission>,
    next_seq: u64,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an emission. Returns `false` when it was collapsed into an
    /// identical delivery already queued within `dedup_window`.
    pub fn enqueue(
        &mut self,
        emission: Emission,
        priority: Priority,
        now: Instant,
        dedup_window: Duration,
    ) -> bool {
        let duplicate = self.pending.iter().any(|q| {
            q.emission.name == emission.name
                && q.emission.payload == emission.payload
                && now.duration_since(q.queued_at) <= dedup_window
        });
        if duplicate {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(QueuedEmission {
            emission,
            priority,
            seq,
            queued_at: now,
        });
        true
    }

    /// True when the batch contains a High-priority emission, which promotes
    /// the flush to the next microtask boundary.
    pub fn has_urgent(&self) -> bool {
        self.pending.iter().any(|q| q.priority == Priority::High)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the whole batch in delivery order.
    pub fn drain_sorted(&mut self) -> Vec<QueuedEmission> {
        let mut batch = std::mem::take(&mut self.pending);
        // Stable sort: ascending priority, insertion order within a priority.
        batch.sort_by_key(|q| (q.priority, q.seq));
        batch
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
