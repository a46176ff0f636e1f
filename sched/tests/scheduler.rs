//! End-to-end scenarios exercising the full public surface: submission,
//! yielding, event-based synchronization, cross-worker resumption, slot
//! recycling after cancellation, and the process-terminating capacity
//! contract.

use sched::{current_task, current_worker_id, yield_now, Event, Scheduler, SchedulerConfig, SchedulerError};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Installs `env_logger` as the `log` facade's backend for this test binary,
/// so the scheduler's `log::{trace,debug,error}!` calls land somewhere
/// visible (run with `RUST_LOG=sched=trace` to see them). Idempotent:
/// `try_init` just returns `Err` on the second and later calls, which every
/// test below ignores.
fn init_logging() {
    let _ = env_logger::try_init();
}

fn quick_config(capacity: usize, workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        capacity,
        workers,
        stack_size: 64 * 1024,
        retry_budget: 4,
        poll_interval: Duration::from_millis(5),
    }
}

#[test]
fn single_task_runs_to_completion() {
    init_logging();
    static RAN: AtomicU32 = AtomicU32::new(0);
    extern "C" fn entry() {
        RAN.fetch_add(1, Ordering::SeqCst);
    }
    RAN.store(0, Ordering::SeqCst);

    let scheduler = Scheduler::new(quick_config(4, 1));
    scheduler.submit(entry, ptr::null_mut());
    scheduler.start();

    assert_eq!(RAN.load(Ordering::SeqCst), 1);
}

#[test]
fn two_tasks_rendezvous_through_an_event() {
    init_logging();
    static GATE: Event = Event::new();
    static SEQUENCE: AtomicU32 = AtomicU32::new(0);

    extern "C" fn waiter() {
        GATE.wait();
        SEQUENCE.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn signaler() {
        assert_eq!(SEQUENCE.load(Ordering::SeqCst), 0, "waiter must not run before the gate opens");
        GATE.fire();
    }

    SEQUENCE.store(0, Ordering::SeqCst);
    let scheduler = Scheduler::new(quick_config(4, 1));
    scheduler.submit(waiter, ptr::null_mut());
    scheduler.submit(signaler, ptr::null_mut());
    scheduler.start();

    assert_eq!(SEQUENCE.load(Ordering::SeqCst), 1);
}

#[test]
fn many_tasks_complete_across_several_workers() {
    init_logging();
    const TASKS: usize = 96;
    const ZERO: AtomicU32 = AtomicU32::new(0);
    static COMPLETED: AtomicUsize = AtomicUsize::new(0);
    // One bitmask per task slot, one bit per worker id observed running it —
    // evidence that a task can resume on a different worker than it
    // suspended on (spec.md §8 scenario 3).
    static WORKERS_SEEN: [AtomicU32; TASKS] = [ZERO; TASKS];

    extern "C" fn bouncy() {
        let idx = current_task().index();
        for _ in 0..5 {
            let worker = current_worker_id();
            WORKERS_SEEN[idx].fetch_or(1 << worker, Ordering::SeqCst);
            yield_now();
        }
        COMPLETED.fetch_add(1, Ordering::SeqCst);
    }

    COMPLETED.store(0, Ordering::SeqCst);
    for seen in &WORKERS_SEEN {
        seen.store(0, Ordering::SeqCst);
    }

    let scheduler = Scheduler::new(quick_config(TASKS, 8));
    for _ in 0..TASKS {
        scheduler.submit(bouncy, ptr::null_mut());
    }
    scheduler.start();

    assert_eq!(COMPLETED.load(Ordering::SeqCst), TASKS);
    let cross_worker = WORKERS_SEEN
        .iter()
        .any(|mask| mask.load(Ordering::SeqCst).count_ones() >= 2);
    assert!(
        cross_worker,
        "expected at least one task to be resumed on more than one worker"
    );
}

#[test]
fn cancelled_slots_are_recycled_for_later_submissions() {
    init_logging();
    extern "C" fn exits_right_away() {}

    let scheduler = Scheduler::new(quick_config(2, 1));
    let first = scheduler.try_submit(exits_right_away, ptr::null_mut()).unwrap();
    let second = scheduler.try_submit(exits_right_away, ptr::null_mut()).unwrap();
    assert_ne!(first.index(), second.index());

    scheduler.start();

    // Both slots were reaped back to Zombie; a fresh round of submissions
    // should reuse the same two indices rather than reporting exhaustion.
    let third = scheduler.try_submit(exits_right_away, ptr::null_mut()).unwrap();
    let fourth = scheduler.try_submit(exits_right_away, ptr::null_mut()).unwrap();
    assert_ne!(third.index(), fourth.index());
    scheduler.start();
}

#[test]
fn try_submit_reports_exhaustion_without_terminating() {
    init_logging();
    extern "C" fn parks_forever() {
        loop {
            yield_now();
        }
    }

    let scheduler = Scheduler::new(quick_config(3, 1));
    for _ in 0..3 {
        scheduler.try_submit(parks_forever, ptr::null_mut()).unwrap();
    }
    let err = scheduler.try_submit(parks_forever, ptr::null_mut()).unwrap_err();
    assert!(matches!(err, SchedulerError::CapacityExhausted { capacity: 3 }));
    // Parked tasks never exit; drop the scheduler without starting it so the
    // test doesn't hang waiting for workers that would never return.
}

#[test]
fn destroy_frees_every_slot_without_a_running_pool() {
    init_logging();
    extern "C" fn unused() {}
    let scheduler = Scheduler::new(quick_config(8, 2));
    for _ in 0..4 {
        scheduler.try_submit(unused, ptr::null_mut()).unwrap();
    }
    scheduler.destroy();
    // Every slot should be free again; the table can be fully refilled.
    for _ in 0..8 {
        scheduler.try_submit(unused, ptr::null_mut()).unwrap();
    }
}

/// `submit` has no recoverable error path: a full table is a fatal
/// misconfiguration, so it terminates the process. Verified out-of-process
/// since the assertion is "the process exited non-zero", not a panic this
/// test binary could catch.
#[test]
fn submit_terminates_the_process_when_the_table_is_full() {
    init_logging();
    const ENV_FLAG: &str = "SCHED_TEST_EXHAUST_CHILD";

    if std::env::var_os(ENV_FLAG).is_some() {
        extern "C" fn unused() {}
        let scheduler = Scheduler::new(quick_config(2, 1));
        scheduler.submit(unused, ptr::null_mut());
        scheduler.submit(unused, ptr::null_mut());
        // The third call has nowhere to go and must exit the process here.
        scheduler.submit(unused, ptr::null_mut());
        panic!("submit() should have terminated the process before this point");
    }

    let exe = std::env::current_exe().expect("test binary path");
    let status = std::process::Command::new(exe)
        .arg("--exact")
        .arg("submit_terminates_the_process_when_the_table_is_full")
        .arg("--nocapture")
        .env(ENV_FLAG, "1")
        .status()
        .expect("failed to spawn child test process");

    assert!(!status.success(), "child process should have exited non-zero");
}
