//! Cooperative cancellation for blocking queue operations.
//!
//! Rust has no built-in thread-interruption signal the way the distilled
//! spec's source language does, so blocking operations take an explicit
//! cancellation flag instead — the idiomatic Rust shape of "respond to
//! cancellation within a bounded delay" from `SPEC_FULL.md` section 5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative, shareable cancellation flag. Clone it to hand a copy to
/// whichever task should be able to cancel a blocking [`crate::Queue`]
/// operation running on another thread.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation. Observed by blocking operations at their next
    /// poll of the flag (bounded by the implementation's retry slice).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
