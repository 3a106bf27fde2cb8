//! Error taxonomy.
//!
//! Only call-contract violations surface as `Err` at the call site. Contained
//! failures (a handler failing mid-emission, an unexpected node shape during
//! reconciliation) are logged and isolated where they happen, and capacity
//! refusals go to the bus warning channel instead of an error return.

use thiserror::Error;

/// Validation errors raised by the event bus at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// `subscribe`/`emit` called with an empty event name.
    #[error("event name must not be empty")]
    EmptyEventName,

    /// A namespace option was supplied but empty.
    #[error("namespace must not be empty when supplied")]
    EmptyNamespace,

    /// A time-to-live of zero would expire the registration before it exists.
    #[error("time-to-live must be non-zero")]
    ZeroTtl,
}

/// Errors raised by the state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// `set`/`subscribe` called with an empty path or empty path segment.
    #[error("path must not be empty or contain empty segments")]
    EmptyPath,

    /// Seed data nested past [`crate::value::MAX_SEED_DEPTH`]. An owned value
    /// tree cannot be cyclic, so depth overflow is the structural failure
    /// mode `initialize` can actually hit.
    #[error("seed nesting exceeds supported depth (at depth {depth})")]
    Structural { depth: usize },

    /// A bus validation error surfaced through a store operation.
    #[error(transparent)]
    Bus(#[from] BusError),
}
