//! # Scheduler Configuration
//!
//! spec.md describes these knobs as compile-time constants
//! (`SCHED_THREADS_LIMIT`, `SCHED_WORKERS_COUNT`, `SCHED_NEXT_MAX_ATTEMPTS`,
//! the per-`UserThread` stack size). This crate keeps their defaults but
//! makes them fields on [`SchedulerConfig`] so an embedder can size the table
//! for its workload without editing source.

use std::time::Duration;

/// Default task table capacity (`SCHED_THREADS_LIMIT` upstream).
pub const DEFAULT_CAPACITY: usize = 64;
/// Default worker thread count (`SCHED_WORKERS_COUNT` upstream).
pub const DEFAULT_WORKERS: usize = 8;
/// Default per-task stack size in bytes.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;
/// Default outer-attempt budget for `next_task` before a worker gives up.
pub const DEFAULT_RETRY_BUDGET: usize = 8;
/// Default sleep between `next_task` attempts when the table looks idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runtime-overridable scheduler knobs. `Default` reproduces the upstream
/// compile-time constants exactly.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Number of task slots in the table.
    pub capacity: usize,
    /// Number of worker OS threads spawned by `start()`.
    pub workers: usize,
    /// Stack size, in bytes, allocated per task's user-thread.
    pub stack_size: usize,
    /// Outer-attempt budget for a worker's `next_task` scan before it treats
    /// the table as quiescent and exits its dispatch loop.
    pub retry_budget: usize,
    /// Sleep interval between `next_task` attempts.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            workers: DEFAULT_WORKERS,
            stack_size: DEFAULT_STACK_SIZE,
            retry_budget: DEFAULT_RETRY_BUDGET,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
