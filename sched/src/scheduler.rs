//! # Scheduler core
//!
//! The fixed-size task table, per-worker dispatch state, and the dispatch
//! loop that ping-pongs control between a worker's own scheduler
//! [`UserThread`] and the task [`UserThread`]s it runs — the heart of the
//! M:N scheduler.
//!
//! ## Key concepts
//! - A worker is one OS thread running [`Scheduler::dispatch_loop`]; it
//!   never blocks on a task, it switches into one and is switched back into
//!   when that task yields or exits.
//! - A task slot's spinlock is held by the dispatcher for that slot's
//!   *entire running period* — acquired by [`next_task`](Scheduler::next_task),
//!   held across the switch into the task, released only after the
//!   dispatcher has observed and acted on the state the task left behind.
//!   This is what makes "at most one worker ever touches a given Running
//!   slot" hold (spec.md's P1): another worker's `try_lock` on that slot
//!   simply fails for as long as it is running.
//! - Cross-worker handoff: a task never remembers which worker is "home".
//!   `task_yield`/`task_exit` look up *this* worker's own scheduler context
//!   through a thread-local, which is correct by construction — the task
//!   executes synchronously on whichever worker's OS thread most recently
//!   switched into it.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::task::{SlotInner, TaskEntry, TaskHandle, TaskSlot, TaskState};
use crate::uthread::{switch, UserThread};

thread_local! {
    /// Raw pointer to the calling OS thread's own `WorkerState`, valid for
    /// the lifetime of that thread's `dispatch_loop` call (the loop's local
    /// variable is never moved or dropped while the loop is suspended mid-switch).
    static WORKER_CTX: Cell<*mut WorkerState> = const { Cell::new(ptr::null_mut()) };
    /// The task handle currently executing on this worker, if any.
    static CURRENT_TASK: Cell<Option<TaskHandle>> = const { Cell::new(None) };
}

/// The scheduler instance a running worker belongs to, so the task
/// trampoline (entered via raw register state, not a normal call) can find
/// its way back to `Scheduler` methods. Set for the duration of
/// [`Scheduler::start`]; generalizes the single `static mut SCHEDULER`
/// pointer `04_context_switch/02_green_threads` uses for the same purpose.
static ACTIVE_SCHEDULER: AtomicPtr<Scheduler> = AtomicPtr::new(ptr::null_mut());

fn active_scheduler() -> &'static Scheduler {
    let ptr = ACTIVE_SCHEDULER.load(Ordering::Acquire);
    assert!(
        !ptr.is_null(),
        "task trampoline invoked with no active scheduler"
    );
    unsafe { &*ptr }
}

/// Per-worker state: its own scheduler [`UserThread`] ("home"), a rotating
/// scan cursor into the task table, and a step counter. Lives for the
/// duration of one [`Scheduler::dispatch_loop`] call, reachable only from
/// that call's own thread via [`WORKER_CTX`].
pub struct Worker {
    id: usize,
    home: UserThread,
    cursor: usize,
    steps: u64,
}

impl Worker {
    /// This worker's id (`0..workers`), stable for its dispatch-loop lifetime.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of tasks this worker has dispatched (and had yield or exit)
    /// so far in its current run.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

type WorkerState = Worker;

/// Returns the handle of the task currently executing on this worker.
///
/// # Panics
/// Panics if called from outside a task body (spec.md §7 calls this
/// "undefined behavior at the contract level"; we make the misuse loud
/// rather than silently returning nonsense).
pub fn current_task() -> TaskHandle {
    CURRENT_TASK
        .with(|c| c.get())
        .expect("current_task() called outside a task body")
}

/// Returns the id of the worker currently running this task, mirroring
/// `schedy.c`'s `thread_local struct worker worker` lookup used for the same
/// purpose. Exists so a task body (or a test observing it) can detect that
/// it has resumed on a different worker than it last ran on — spec.md §8
/// scenario 3's "at least two distinct workers observed... for at least one
/// task" is otherwise unobservable from outside the dispatcher.
///
/// # Panics
/// Panics if called from outside a worker's dispatch loop.
pub fn current_worker_id() -> usize {
    WORKER_CTX.with(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "current_worker_id() called outside a worker's dispatch loop"
        );
        unsafe { (*ptr).id() }
    })
}

/// Yields the currently executing task back to its worker, to be resumed
/// later from wherever this call left off. Equivalent to
/// `Scheduler::task_yield(current_task())`, but does not require the task
/// body to be passed (or to have kept) a scheduler reference.
///
/// # Panics
/// Panics if called from outside a task body.
pub fn yield_now() {
    active_scheduler().task_yield(current_task());
}

/// Ends the currently executing task. Never returns: the slot is marked
/// cancelled and control does not come back here.
///
/// # Panics
/// Panics if called from outside a task body.
pub fn exit_now() -> ! {
    active_scheduler().task_exit(current_task());
    unreachable!("task_exit never returns to its caller");
}

// The raw assembly landing pad for a task's very first switch-in. It moves
// the two argument-channel registers (`r15`, `r14`) into the System V
// integer-argument registers before making a normal `call` into Rust, which
// is the only place those physical registers can be read reliably — by the
// time a plain `fn()` body runs, the compiler's own prologue may have
// already reused them as scratch space. `and rsp, -16` defends against the
// one-off alignment case where a task slot's user-thread was reset by a
// caller that did not go through `UserThread::reset`'s ABI-aware frame
// placement.
core::arch::global_asm!(
    ".global sched_task_trampoline",
    "sched_task_trampoline:",
    "and rsp, -16",
    "mov rdi, r15",
    "mov rsi, r14",
    "call {entry}",
    "ud2",
    entry = sym rust_trampoline_entry,
);

extern "C" {
    /// See the `global_asm!` block above for the implementation.
    fn sched_task_trampoline();
}

/// Rust-side half of the task trampoline: receives the task's slot index and
/// user argument pointer (delivered via registers, see the `global_asm!`
/// block above), stores the argument where [`Scheduler::task_argument`] can
/// find it later, runs the user's entry function, and exits the task.
extern "C" fn rust_trampoline_entry(handle_idx: usize, arg: *mut u8) -> ! {
    let handle = TaskHandle(handle_idx);
    let scheduler = active_scheduler();
    let entry = {
        // SAFETY: the dispatcher holds this slot's spinlock for the task's
        // entire running period (see `dispatch_loop`), and we are that
        // task, running synchronously within that window: no other worker
        // can observe or mutate this slot concurrently.
        let inner = unsafe { &mut *scheduler.slots[handle_idx].inner.data_ptr() };
        inner.arg = arg;
        inner
            .entry
            .expect("task dispatched with no entry installed")
    };
    entry();
    scheduler.task_exit(handle);
    unreachable!("task_exit never returns to its caller");
}

/// The fixed-size task table and the dispatch machinery built on top of it.
pub struct Scheduler {
    slots: Box<[TaskSlot]>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Initializes the task table: every slot `Zombie`, no user-thread
    /// allocated, spinlock free.
    pub fn new(config: SchedulerConfig) -> Self {
        let slots = (0..config.capacity)
            .map(|_| TaskSlot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots, config }
    }

    /// Number of slots in the task table.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Submits `entry` to run with `arg`, terminating the process with a
    /// diagnostic if the task table is exhausted (spec.md's documented
    /// rationale: there is no backpressure primitive and no caller recovery
    /// path within the contract). Use [`Scheduler::try_submit`] to observe
    /// the failure instead.
    pub fn submit(&self, entry: TaskEntry, arg: *mut u8) {
        match self.try_submit(entry, arg) {
            Ok(_) => {}
            Err(err) => {
                log::error!("{err}");
                std::process::exit(1);
            }
        }
    }

    /// Like [`Scheduler::submit`], but returns
    /// [`SchedulerError::CapacityExhausted`] instead of terminating the
    /// process when the table is full.
    pub fn try_submit(&self, entry: TaskEntry, arg: *mut u8) -> Result<TaskHandle, SchedulerError> {
        for idx in 0..self.slots.len() {
            let mut guard = match self.slots[idx].inner.try_lock() {
                Some(guard) => guard,
                None => continue,
            };

            if guard.ut.is_none() {
                guard.ut = Some(
                    UserThread::allocate(self.config.stack_size)
                        .ok_or(SchedulerError::UtAllocationFailed)?,
                );
                guard.state = TaskState::Zombie;
            }

            if guard.state != TaskState::Zombie {
                // occupied by a live task; release and keep scanning
                continue;
            }

            let ut = guard.ut.as_mut().expect("just populated above");
            ut.reset();
            ut.set_entry(sched_task_trampoline);
            ut.set_arg_0(idx);
            ut.set_arg_1(arg);
            guard.entry = Some(entry);
            guard.state = TaskState::Runnable;
            log::trace!("submitted task into slot {idx}");
            return Ok(TaskHandle(idx));
        }

        Err(SchedulerError::CapacityExhausted {
            capacity: self.slots.len(),
        })
    }

    /// Spawns `config.workers` worker threads, each running
    /// [`Scheduler::dispatch_loop`], and blocks until every one of them has
    /// observed an empty task table across its retry budget and returned.
    pub fn start(&self) {
        ACTIVE_SCHEDULER.store(self as *const Scheduler as *mut Scheduler, Ordering::Release);
        log::info!(
            "starting {} worker(s) over {} slot(s)",
            self.config.workers,
            self.slots.len()
        );

        std::thread::scope(|scope| {
            for id in 0..self.config.workers {
                std::thread::Builder::new()
                    .name(format!("sched-worker-{id}"))
                    .spawn_scoped(scope, move || self.dispatch_loop(id))
                    .expect("failed to spawn worker thread");
            }
        });

        ACTIVE_SCHEDULER.store(ptr::null_mut(), Ordering::Release);
        log::info!("all workers exited");
    }

    /// For each slot, acquires its spinlock and frees its user-thread (if
    /// one was allocated). Must only be called when no worker is active.
    pub fn destroy(&self) {
        debug_assert!(
            ACTIVE_SCHEDULER.load(Ordering::Acquire).is_null(),
            "destroy() called while a worker pool is active"
        );
        for slot in self.slots.iter() {
            let mut guard = slot.inner.lock();
            guard.ut = None;
        }
    }

    /// Returns the user argument pointer passed to [`Scheduler::submit`] for
    /// `task`.
    pub fn task_argument(&self, task: TaskHandle) -> *mut u8 {
        // SAFETY: called from within the task's own body (or after, while
        // the caller otherwise guarantees the slot is still occupied by
        // this task); the dispatcher's lock is held throughout the running
        // period, so no concurrent writer exists.
        unsafe { (*self.slots[task.index()].inner.data_ptr()).arg }
    }

    /// Returns the worker id currently recorded against `task`'s slot, or
    /// `None` if it is not presently `Running`. A snapshot, not a guarantee —
    /// the task may have yielded and been re-picked up by another worker by
    /// the time the caller observes the result. Exists for the same
    /// observability need as [`current_worker_id`]: querying from outside
    /// the task itself (e.g. a test harness polling between `start()` runs).
    pub fn task_worker(&self, task: TaskHandle) -> Option<usize> {
        self.slots[task.index()].inner.lock().worker
    }

    /// Switches `task` from its own user-thread back to its worker's
    /// scheduler user-thread. Clears the slot's worker back-pointer first,
    /// so that on resumption — possibly by a different worker — the task
    /// re-reads its worker fresh.
    pub fn task_yield(&self, task: TaskHandle) {
        let slot = &self.slots[task.index()];
        let ut_ptr: *mut UserThread = unsafe {
            // SAFETY: see `rust_trampoline_entry` — the dispatcher's lock is
            // held for this slot's entire running period.
            let inner = &mut *slot.inner.data_ptr();
            inner.worker = None;
            inner
                .ut
                .as_mut()
                .expect("task_yield called with no user-thread installed") as *mut UserThread
        };

        WORKER_CTX.with(|cell| {
            let worker_ptr = cell.get();
            debug_assert!(
                !worker_ptr.is_null(),
                "task_yield called outside a worker's dispatch loop"
            );
            let worker = unsafe { &mut *worker_ptr };
            unsafe { switch(&mut *ut_ptr, &worker.home) };
        });
    }

    /// Marks `task` cancelled, then yields — equivalent to `cancel` followed
    /// by `yield`. The dispatcher that observes `Cancelled` on return from
    /// this yield is the one responsible for recycling the slot.
    pub fn task_exit(&self, task: TaskHandle) {
        self.cancel(task);
        self.task_yield(task);
    }

    /// Sets `task`'s state to `Cancelled`. Called from within the task
    /// itself (via [`Scheduler::task_exit`]) under the invariant that the
    /// slot's lock is currently held by the dispatcher for that task.
    fn cancel(&self, task: TaskHandle) {
        unsafe {
            (*self.slots[task.index()].inner.data_ptr()).state = TaskState::Cancelled;
        }
    }

    /// One worker's dispatch loop: repeatedly finds a runnable slot,
    /// switches into it, and reacts to what state it finds on return, until
    /// [`Scheduler::next_task`] reports the table quiescent.
    fn dispatch_loop(&self, id: usize) {
        let mut worker = Worker {
            id,
            home: UserThread::home(),
            cursor: 0,
            steps: 0,
        };
        WORKER_CTX.with(|c| c.set(&mut worker as *mut Worker));
        log::debug!("worker {id} entering dispatch loop");

        loop {
            let (idx, mut guard) = match self.next_task(&mut worker) {
                Some(found) => found,
                None => break,
            };

            guard.state = TaskState::Running;
            guard.worker = Some(id);
            let handle = TaskHandle(idx);
            CURRENT_TASK.with(|c| c.set(Some(handle)));

            let task_ut: *const UserThread =
                guard.ut.as_ref().expect("runnable slot with no user-thread") as *const _;
            unsafe {
                switch(&mut worker.home, &*task_ut);
            }

            CURRENT_TASK.with(|c| c.set(None));

            match guard.state {
                TaskState::Cancelled => {
                    guard
                        .ut
                        .as_mut()
                        .expect("cancelled slot with no user-thread")
                        .reset();
                    guard.state = TaskState::Zombie;
                    log::trace!("worker {id} reaped slot {idx}");
                }
                TaskState::Running => {
                    guard.state = TaskState::Runnable;
                }
                other => {
                    log::error!("worker {id} observed invariant violation in slot {idx}: {other:?}");
                    let err = SchedulerError::InvariantViolation(
                        "dispatcher resumed a slot that was neither Running nor Cancelled",
                    );
                    panic!("{err}: slot {idx} observed {other:?}");
                }
            }

            drop(guard);
            worker.steps += 1;
        }

        WORKER_CTX.with(|c| c.set(ptr::null_mut()));
        log::debug!("worker {id} exiting after {} step(s)", worker.steps);
    }

    /// Scans the task table for a runnable slot, starting from `worker`'s
    /// cursor and rotating through up to `config.retry_budget` outer
    /// attempts, sleeping `config.poll_interval` between them. Returns the
    /// slot index and its held guard on success; `None` once the table has
    /// looked idle for the whole retry budget (the shutdown signal).
    fn next_task(&self, worker: &mut Worker) -> Option<(usize, crate::spinlock::SpinGuard<'_, SlotInner>)> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        for _attempt in 0..self.config.retry_budget {
            let mut scan = worker.cursor;
            for _ in 0..n {
                let idx = scan;
                scan = (scan + 1) % n;

                let guard = match self.slots[idx].inner.try_lock() {
                    Some(guard) => guard,
                    // another worker holds it; don't advance the cursor for this slot
                    None => continue,
                };

                worker.cursor = (idx + 1) % n;
                if guard.ut.is_some() && guard.state == TaskState::Runnable {
                    return Some((idx, guard));
                }
                drop(guard);
            }
            std::thread::sleep(self.config.poll_interval);
        }
        None
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}
