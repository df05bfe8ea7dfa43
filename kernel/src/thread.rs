//! Thread dispatch interface.
//!
//! The process subsystem does not schedule anything itself. It asks the
//! machine layer to spawn kernel threads, put the current one to sleep,
//! wake sleepers, and finally drop into user mode.

use alloc::boxed::Box;
use core::fmt;

use crate::error::KResult;
use crate::process::{ProcessId, TrapFrame};
use crate::vm::UserPtr;

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a new kernel thread.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Everything needed to start a freshly loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStart {
    /// Number of arguments.
    pub argc: usize,
    /// User address of the NULL-terminated argument pointer array.
    pub argv: UserPtr,
    /// Environment pointer (always NULL).
    pub envp: UserPtr,
    /// Initial user stack pointer.
    pub stack_pointer: UserPtr,
    /// Program entry point.
    pub entry: UserPtr,
}

/// Low-level thread services provided by the machine layer.
pub trait Scheduler: Send + Sync {
    /// Thread currently executing on this CPU.
    fn current_thread(&self) -> ThreadId;

    /// Process the current thread belongs to, if any.
    fn current_process(&self) -> Option<ProcessId>;

    /// Whether the CPU is servicing an interrupt.
    fn in_interrupt(&self) -> bool {
        false
    }

    /// Put the current thread to sleep until `unblock` is called for it.
    ///
    /// A wakeup that arrives before the thread sleeps is remembered, so
    /// `block` returns immediately in that case. Spurious returns are
    /// allowed; callers re-check their condition.
    fn block(&self);

    /// Make a sleeping thread runnable.
    fn unblock(&self, thread: ThreadId);

    /// Create a kernel thread attached to `pid` that runs `entry`.
    fn spawn(&self, name: &str, pid: ProcessId, entry: ThreadEntry) -> KResult<ThreadId>;

    /// Switch the current thread to user mode at a new program.
    fn enter_new_process(&self, start: ProgramStart) -> !;

    /// Resume user mode from a forked trapframe.
    fn enter_forked_process(&self, frame: TrapFrame) -> !;

    /// Terminate the current thread.
    fn exit_thread(&self) -> !;
}
