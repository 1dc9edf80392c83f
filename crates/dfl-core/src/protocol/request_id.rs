//! Process-unique request identifiers for control-plane correlation.
//!
//! Every request sent to OBS carries a caller-chosen `requestId`, and OBS
//! echoes it in the matching response.  Responses may arrive in any order, so
//! the id is the only thing that ties a response to its waiting caller.  Ids
//! therefore must never repeat within one process lifetime, across
//! reconnects included: a late response from a dead connection must not match
//! a request made on the new one.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU64`, so any number of tasks can draw ids at the
//! same time without a lock and without ever receiving the same value.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out `req-1`, `req-2`, … for the lifetime of the process.
///
/// # Examples
///
/// ```rust
/// use dfl_core::RequestIdCounter;
///
/// let ids = RequestIdCounter::new();
/// assert_eq!(ids.next_id(), "req-1");
/// assert_eq!(ids.next_id(), "req-2");
/// ```
#[derive(Debug)]
pub struct RequestIdCounter {
    inner: AtomicU64,
}

impl RequestIdCounter {
    /// Creates a counter whose first id is `req-1`.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next id and advances the counter.
    ///
    /// `Relaxed` ordering is enough: uniqueness comes from the atomic
    /// read-modify-write itself, and the ids synchronise no other memory.
    pub fn next_id(&self) -> String {
        format!("req-{}", self.inner.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
