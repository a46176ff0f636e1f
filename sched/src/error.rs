//! # Error Types
//!
//! The scheduler's failure modes are few and coarse by design (see the
//! crate-level docs): most of them are fatal at the call site rather than
//! recoverable, because there is no backpressure primitive and no caller
//! recovery path within the contract. This module types them anyway so an
//! embedder using [`Scheduler::try_submit`](crate::scheduler::Scheduler::try_submit)
//! can observe and log a failure instead of the process simply exiting.

use thiserror::Error;

/// Failure modes surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every task slot was occupied after a full scan of the table.
    /// [`Scheduler::submit`](crate::scheduler::Scheduler::submit) terminates
    /// the process on this condition; [`Scheduler::try_submit`](crate::scheduler::Scheduler::try_submit)
    /// returns it instead.
    #[error("task table exhausted: all {capacity} slots occupied")]
    CapacityExhausted {
        /// Configured task table capacity.
        capacity: usize,
    },

    /// Allocating a user-thread stack failed. Reached only if an embedder
    /// wires in a fallible allocation hook; the default allocator aborts the
    /// process before this variant can be constructed.
    #[error("user-thread stack allocation failed")]
    UtAllocationFailed,

    /// The dispatcher observed a task slot in a state the state machine does
    /// not allow after resumption (anything other than `Running` or
    /// `Cancelled`). Indicates a scheduler bug — a use-after-free or lost
    /// wakeup — rather than anything a caller did.
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}
