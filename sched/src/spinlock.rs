//! # Spinlock
//!
//! A minimal test-and-set mutex with a non-blocking `try_lock`, used to
//! serialize access to task-table slots. No fairness, no back-off — it is
//! held only for the brief window of a scheduler decision, never across a
//! context switch into a task.
//!
//! Generalizes `03_os_concurrency/03_spinlock` and `04_spinlock_guard` from
//! a single-field lock into the RAII-guarded lock the task table uses
//! throughout.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A single-word test-and-set mutex guarding `T`.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Spins until the lock is acquired, then returns a guard.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinGuard { lock: self }
    }

    /// Attempts to acquire the lock without spinning. Returns `None` if
    /// another worker currently holds it.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    /// # Safety
    /// Must only be called by the thread currently holding the lock, and
    /// must not be called while a [`SpinGuard`] for this lock is still live
    /// (it would double-unlock on drop).
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Raw access to the guarded data, bypassing the lock entirely.
    ///
    /// # Safety
    /// Callers must independently establish exclusive access — e.g. the
    /// scheduler's dispatcher holds this lock for a task slot's entire
    /// running period, and the running task itself (executing synchronously
    /// within that window, on the same worker thread) uses this to touch
    /// its own slot without re-entering the lock it cannot see from its own
    /// call stack.
    pub(crate) unsafe fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

/// RAII guard holding a [`SpinLock`]; releases it on drop.
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() };
    }
}
