//! Dot-delimited path handling.
//!
//! A path addresses a location in the state tree: `"user.profile.name"`.
//! Segments are split on `.`; a segment that parses as an unsigned integer
//! indexes into sequences on reads.

use crate::error::StoreError;

/// Reject empty paths and paths with empty segments (`"a..b"`, `".a"`).
pub fn validate(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(StoreError::EmptyPath);
    }
    Ok(())
}

/// Split a path into segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.')
}

/// Whether a write at `changed` concerns a subscription at `subscribed`.
///
/// True when the paths are equal or either is a dot-prefix of the other:
/// a write below the subscribed path changes the subscribed value, and a
/// write above it replaces the subtree containing it.
pub fn overlaps(changed: &str, subscribed: &str) -> bool {
    if changed == subscribed {
        return true;
    }
    is_prefix(subscribed, changed) || is_prefix(changed, subscribed)
}

/// True when `outer` is a strict dot-prefix of `inner` (`"user"` of
/// `"user.name"`, but not of `"user2"`).
fn is_prefix(outer: &str, inner: &str) -> bool {
    inner
        .strip_prefix(outer)
        .is_some_and(|rest| rest.starts_with('.'))
}

// =============================================================================
// Tests
// =============================================================================
