//! # Event
//!
//! The minimal synchronization object that demonstrates the cooperative
//! contract: a one-shot boolean flag. `wait` busy-yields until `fire` sets
//! it; there is no waiter queue and no wake-on-fire, by design (see Design
//! Notes in spec.md §9) — a production design would add one, but that is
//! beyond this core.

use std::sync::atomic::{AtomicBool, Ordering};

/// A single-shot boolean synchronizer. Starts unfired; may transition to
/// fired at most once. Further fires are idempotent.
pub struct Event {
    fired: AtomicBool,
}

impl Event {
    /// Creates an unfired event.
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Yields the calling task repeatedly until this event has been fired.
    /// Burns one scheduling quantum per poll — acceptable for a minimal
    /// primitive. Must be called from within a task body.
    ///
    /// The final load that observes `true` uses `Acquire` ordering, paired
    /// with `fire`'s `Release` store, so any writes sequenced before that
    /// `fire` are visible once `wait` returns.
    pub fn wait(&self) {
        while !self.fired.load(Ordering::Acquire) {
            crate::scheduler::yield_now();
        }
    }

    /// Sets the event. Idempotent: firing an already-fired event is a
    /// no-op other than the redundant store.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Returns whether the event has been fired, without yielding.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
