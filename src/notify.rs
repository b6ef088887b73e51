//! Condvar-backed notification used by the blocking queue operations.
//!
//! A generation counter plus `Condvar::wait_timeout` gives bounded wake-up
//! latency for cancellation checks without a raw spin loop, while
//! [`crate::backoff::Backoff`] still covers the short uncontended fast path
//! before a waiter parks.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// How long a waiter parks before re-checking its condition and the
/// cooperative cancellation flag. Bounds cancellation latency per
/// `SPEC_FULL.md` section 5.
const PARK_SLICE: Duration = Duration::from_millis(5);

pub(crate) struct Notify {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Notify {
    pub(crate) fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Wakes every current waiter.
    pub(crate) fn notify_all(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Parks for at most one short slice, or until [`Self::notify_all`] is
    /// called. Callers loop on this themselves so they can re-check both
    /// their condition and a cancellation flag between parks.
    pub(crate) fn wait_one_slice(&self) {
        let generation = self.generation.lock().unwrap();
        let _ = self.condvar.wait_timeout(generation, PARK_SLICE).unwrap();
    }
}
