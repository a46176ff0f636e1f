//! An M:N cooperative user-thread scheduler: a fixed number of OS worker
//! threads multiplex a larger, fixed-capacity pool of cooperatively
//! scheduled tasks via explicit stack switching. No preemption — a task
//! only ever gives up its worker by calling [`Scheduler::task_yield`] or
//! [`Scheduler::task_exit`] (or, indirectly, by waiting on an [`Event`]).
//!
//! ```no_run
//! use sched::{current_task, Scheduler, SchedulerConfig};
//! use std::ptr;
//!
//! extern "C" fn hello() {
//!     println!("running as task {:?}", current_task());
//! }
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.submit(hello, ptr::null_mut());
//! scheduler.start();
//! ```

mod config;
mod error;
mod event;
mod scheduler;
mod spinlock;
mod task;
mod uthread;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use event::Event;
pub use scheduler::{current_task, current_worker_id, exit_now, yield_now, Scheduler, Worker};
pub use task::{TaskEntry, TaskHandle, TaskState};
