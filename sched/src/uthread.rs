//! # User-thread primitive
//!
//! A user-thread (`UserThread`) is an independently-resumable execution
//! context: a private stack plus a saved register frame. It knows nothing
//! about tasks or workers — it is pure stack-switching machinery, the
//! lowest layer the scheduler is built on (compare
//! `04_context_switch/01_stack_coroutine` and `02_green_threads`, which do
//! the same thing for a single riscv64 thread; this is the x86-64 System V
//! generalization used by a multi-worker scheduler).
//!
//! ## Key concepts
//! - Callee-preserved registers: saved on switch-out, restored on switch-in,
//!   so the switched-away context resumes exactly where it left off.
//! - The saved instruction pointer doubles as the resume point on every
//!   switch after the first, and as the initial entry point on the first.
//! - Two callee-preserved registers (`r15`, `r14`) double as a two-argument
//!   channel for the very first switch into a freshly reset thread.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Bytes reserved for a task's private stack, not counting the
/// [`SwitchFrame`] carved out of its high end.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// The exact set of callee-preserved x86-64 System V registers plus saved
/// flags and return address, laid out so that a single pair of stack-pointer
/// loads and a `ret` restores them.
///
/// Field order is the pop order: `rflags` is restored first (via `popfq`),
/// then `r15`..`rbx` (via `pop`), and `rip` last (implicitly, via `ret`).
/// `r15`/`r14` double as the arg-0/arg-1 channel read by the scheduler's
/// task trampoline on first entry.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct SwitchFrame {
    rflags: u64,
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbp: u64,
    rbx: u64,
    rip: u64,
}

/// An independently-resumable execution context: a private stack and a
/// saved register frame. Does not know which task or worker owns it.
///
/// Invariant: when not currently executing, `context` addresses a valid
/// [`SwitchFrame`] within this thread's own stack whose saved `rip` is the
/// resume point.
pub struct UserThread {
    stack: Option<NonNull<u8>>,
    stack_size: usize,
    /// Points at the live `SwitchFrame` within `stack` when suspended.
    context: *mut u8,
}

unsafe impl Send for UserThread {}

fn stack_layout(stack_size: usize) -> Layout {
    Layout::from_size_align(stack_size, 16).expect("stack size overflow")
}

impl UserThread {
    /// Allocates a stack of `stack_size` bytes and seats the context pointer
    /// at a zeroed [`SwitchFrame`] at its high end. Fails only on allocator
    /// OOM.
    pub fn allocate(stack_size: usize) -> Option<Self> {
        let layout = stack_layout(stack_size);
        let stack = NonNull::new(unsafe { alloc::alloc(layout) })?;
        let mut thread = Self {
            stack: Some(stack),
            stack_size,
            context: std::ptr::null_mut(),
        };
        thread.reset();
        Some(thread)
    }

    /// Constructs the placeholder `UserThread` a [`Worker`](crate::scheduler::Worker)
    /// uses as its "home" context. It owns no stack of its own: a worker's
    /// dispatch loop runs directly on the underlying OS thread's native
    /// stack, and this value exists only to receive that stack's context
    /// pointer the first time the worker switches away into a task (it is
    /// always a `switch` *source* before it is ever a `switch` target, so no
    /// pre-seated frame is required).
    pub(crate) fn home() -> Self {
        Self {
            stack: None,
            stack_size: 0,
            context: std::ptr::null_mut(),
        }
    }

    /// Re-initializes the switch-frame to zero and re-seats the context
    /// pointer as at allocation. Used to recycle a slot after cancellation.
    ///
    /// # Safety (caller contract)
    /// Must not be called while this thread is currently executing or
    /// referenced by any task slot as `Running`.
    pub fn reset(&mut self) {
        let stack = self
            .stack
            .expect("reset() called on a home context with no stack");
        let stack_end = unsafe { stack.as_ptr().add(self.stack_size) } as usize;
        let raw = stack_end - std::mem::size_of::<SwitchFrame>();
        // `switch`'s final `ret` pops the saved `rip` and lands on the
        // trampoline with rsp advanced by 8 past the frame's base. For that
        // to look like a genuine `call` entry (rsp % 16 == 8, per the System
        // V ABI) the frame's base address itself must be ≡ 8 (mod 16).
        // Round down to the nearest such address so the frame still fits
        // entirely below `stack_end`.
        let frame_addr = (((raw - 8) & !0xf) + 8) as *mut u8;
        unsafe {
            std::ptr::write(frame_addr as *mut SwitchFrame, SwitchFrame::default());
        }
        self.context = frame_addr;
    }

    fn frame_mut(&mut self) -> &mut SwitchFrame {
        unsafe { &mut *(self.context as *mut SwitchFrame) }
    }

    /// Writes `entry` as the saved instruction pointer.
    pub fn set_entry(&mut self, entry: unsafe extern "C" fn()) {
        self.frame_mut().rip = entry as usize as u64;
    }

    /// Writes `value` into the designated arg-0 register (`r15`).
    pub fn set_arg_0(&mut self, value: usize) {
        self.frame_mut().r15 = value as u64;
    }

    /// Writes `value` into the designated arg-1 register (`r14`).
    pub fn set_arg_1(&mut self, value: *mut u8) {
        self.frame_mut().r14 = value as u64;
    }

    /// Raw context pointer, for passing to [`switch`].
    fn context_ptr_mut(&mut self) -> *mut *mut u8 {
        &mut self.context as *mut *mut u8
    }

    fn context_ptr(&self) -> *const u8 {
        self.context
    }
}

impl Drop for UserThread {
    fn drop(&mut self) {
        if let Some(stack) = self.stack {
            unsafe { alloc::dealloc(stack.as_ptr(), stack_layout(self.stack_size)) };
        }
    }
}

/// The actual register save/restore, isolated in a `#[unsafe(naked)]`
/// function rather than plain `asm!` against the live call stack: a normal
/// `fn` gives LLVM no guarantee against inserting a prologue (frame-pointer
/// push, stack-protector, spill slots) ahead of an embedded `asm!` block, and
/// since the restore side pops a fixed-size frame and then `ret`s, any such
/// prologue silently desyncs the pairing and `ret` lands on garbage. A naked
/// function has no prologue/epilogue at all — its body *is* the function, so
/// the pushes below are exactly what lands on `prev`'s stack.
///
/// Takes `prev`'s context-pointer slot in `rdi` and `next`'s context pointer
/// in `rsi` per the x86-64 System V integer-argument registers; a naked
/// function cannot use `asm!`'s named operands (there is no register
/// allocator pass to satisfy them), so the body addresses those registers by
/// name directly.
#[unsafe(naked)]
unsafe extern "sysv64" fn switch_raw(prev_ctx: *mut *mut u8, next_ctx: *const u8) {
    std::arch::naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "pushfq",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// Switches from `prev` to `next`: saves `prev`'s callee-preserved registers
/// and flags onto `prev`'s own stack, records the resulting stack pointer in
/// `prev`, loads `next`'s stack pointer, restores its saved state, and
/// resumes at its saved `rip`.
///
/// Returns to `prev` exactly when some other context switches back into it.
/// Anything not in the saved set (floating point, vector registers, TLS
/// base) is **not** preserved — the scheduler must never switch away from
/// the middle of code with live state in those registers. This is why entry
/// on first switch must land directly in a dedicated trampoline rather than
/// arbitrary user code (see the scheduler module's task trampoline).
///
/// This must be written as machine-level glue: the compiler cannot be
/// trusted to preserve this register set across an arbitrary control
/// transfer on its own.
///
/// # Safety
/// `prev` and `next` must each address a valid stack with a live
/// [`SwitchFrame`] at the location their context pointer names. Neither may
/// be switched into concurrently from another thread.
pub unsafe fn switch(prev: &mut UserThread, next: &UserThread) {
    let prev_ctx = prev.context_ptr_mut();
    let next_ctx = next.context_ptr();
    unsafe { switch_raw(prev_ctx, next_ctx) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_seats_context_within_stack() {
        let ut = UserThread::allocate(DEFAULT_STACK_SIZE).expect("alloc");
        let ctx = ut.context as usize;
        let base = ut.stack.unwrap().as_ptr() as usize;
        assert!(ctx >= base);
        assert!(ctx < base + DEFAULT_STACK_SIZE);
        assert_eq!(ctx % 16, 8);
    }

    #[test]
    fn reset_reseats_and_zeroes_frame() {
        let mut ut = UserThread::allocate(DEFAULT_STACK_SIZE).expect("alloc");
        ut.set_arg_0(0xdead);
        ut.reset();
        assert_eq!(ut.frame_mut().r15, 0);
        assert_eq!(ut.frame_mut().rip, 0);
    }

    #[test]
    fn set_entry_and_args_write_expected_fields() {
        unsafe extern "C" fn stub() {}
        let mut ut = UserThread::allocate(DEFAULT_STACK_SIZE).expect("alloc");
        ut.set_entry(stub);
        ut.set_arg_0(7);
        let mut buf = [0u8; 4];
        ut.set_arg_1(buf.as_mut_ptr());
        assert_eq!(ut.frame_mut().rip, stub as usize as u64);
        assert_eq!(ut.frame_mut().r15, 7);
        assert_eq!(ut.frame_mut().r14, buf.as_mut_ptr() as u64);
    }

    /// End-to-end switch test: switch into a task that immediately switches
    /// back, verifying register state survives the round trip on the
    /// caller's side. Exercises `switch` directly, below the scheduler.
    #[test]
    fn switch_round_trips_to_entry_and_back() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static REACHED: AtomicU32 = AtomicU32::new(0);
        static mut MAIN: *mut UserThread = std::ptr::null_mut();
        static mut TASK: *mut UserThread = std::ptr::null_mut();

        unsafe extern "C" fn entry() {
            REACHED.store(42, Ordering::SeqCst);
            unsafe {
                switch(&mut *TASK, &*MAIN);
            }
        }

        REACHED.store(0, Ordering::SeqCst);
        let mut main_ut = UserThread::allocate(DEFAULT_STACK_SIZE).expect("alloc");
        let mut task_ut = UserThread::allocate(DEFAULT_STACK_SIZE).expect("alloc");
        task_ut.set_entry(entry);

        unsafe {
            MAIN = &mut main_ut;
            TASK = &mut task_ut;
            switch(&mut main_ut, &task_ut);
        }

        assert_eq!(REACHED.load(Ordering::SeqCst), 42);
    }
}
