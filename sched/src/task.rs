//! # Task slot
//!
//! The unit the scheduler owns: a [`UserThread`] plus a state field, a
//! back-pointer to the task's current worker, and the spinlock guarding all
//! of it. Task slots live in a fixed-size table owned by the
//! [`Scheduler`](crate::scheduler::Scheduler).

use crate::spinlock::SpinLock;
use crate::uthread::UserThread;

/// A zero-argument entry function submitted by the caller. Retrieves its
/// task handle and argument via [`current_task`](crate::scheduler::current_task)
/// and [`task_argument`](crate::scheduler::Scheduler::task_argument) rather
/// than through parameters — see the crate-level docs for why.
pub type TaskEntry = fn();

/// Opaque handle to a task's slot in the table. `Copy` by design: spec.md's
/// two overlapping handle definitions collapse into this single type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) usize);

impl TaskHandle {
    /// The slot index this handle addresses.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A task slot's lifecycle state.
///
/// ```text
/// Zombie -> submit -> Runnable -> dispatcher picks -> Running
/// Running -> yield -> Runnable
/// Running -> exit (then yield) -> Cancelled -> dispatcher reaps -> Zombie
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No task occupies this slot; available for submit.
    Zombie,
    /// A task is installed and waiting to be picked up by a worker.
    Runnable,
    /// A task is currently executing on some worker.
    Running,
    /// A task has called exit and is waiting to be reaped by the dispatcher.
    Cancelled,
}

/// Mutable state guarded by a slot's spinlock.
pub(crate) struct SlotInner {
    pub ut: Option<UserThread>,
    pub state: TaskState,
    /// Valid only while `state == Running`.
    pub worker: Option<usize>,
    pub entry: Option<TaskEntry>,
    pub arg: *mut u8,
}

impl SlotInner {
    const fn new() -> Self {
        Self {
            ut: None,
            state: TaskState::Zombie,
            worker: None,
            entry: None,
            arg: std::ptr::null_mut(),
        }
    }
}

// `arg` is a caller-supplied pointer the scheduler never dereferences itself
// (ownership contract: the caller guarantees it outlives the task); treating
// the slot as Send/Sync is safe because all access goes through the spinlock.
unsafe impl Send for SlotInner {}

/// One entry in the scheduler's task table.
pub struct TaskSlot {
    pub(crate) inner: SpinLock<SlotInner>,
}

impl TaskSlot {
    pub(crate) const fn new() -> Self {
        Self {
            inner: SpinLock::new(SlotInner::new()),
        }
    }
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self::new()
    }
}
