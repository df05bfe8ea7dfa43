//! Syscall Tracing and Statistics
//!
//! When tracing is on, every syscall entry and exit is logged at `trace`
//! level with the caller's pid, the syscall name, its arguments and its
//! result. Statistics (per-syscall invocation counts) are collected
//! independently and are on by default.
//!
//! Tracing is switched on at boot by `KernelConfig::trace_syscalls`
//! (default: the `trace-syscalls` feature) or at runtime.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{SyscallNumber, SyscallResult};

// ═══════════════════════════════════════════════════════════════════════
// Trace configuration
// ═══════════════════════════════════════════════════════════════════════

/// Global flag controlling whether syscall tracing is active.
static TRACE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Global flag controlling whether syscall statistics collection is active.
static STATS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Enable syscall tracing.
pub fn enable_trace() {
    TRACE_ENABLED.store(true, Ordering::SeqCst);
    log::info!("[TRACE] syscall tracing enabled");
}

/// Disable syscall tracing.
pub fn disable_trace() {
    TRACE_ENABLED.store(false, Ordering::SeqCst);
    log::info!("[TRACE] syscall tracing disabled");
}

/// Check if tracing is enabled.
pub fn is_trace_enabled() -> bool {
    TRACE_ENABLED.load(Ordering::Relaxed)
}

/// Enable statistics collection.
pub fn enable_stats() {
    STATS_ENABLED.store(true, Ordering::SeqCst);
}

/// Disable statistics collection.
pub fn disable_stats() {
    STATS_ENABLED.store(false, Ordering::SeqCst);
}

/// Check if stats are enabled.
pub fn is_stats_enabled() -> bool {
    STATS_ENABLED.load(Ordering::Relaxed)
}

// ═══════════════════════════════════════════════════════════════════════
// Syscall names
// ═══════════════════════════════════════════════════════════════════════

/// Human-readable name for a syscall number.
///
/// Returns `None` for numbers this kernel does not implement.
pub fn syscall_name(nr: u64) -> Option<&'static str> {
    let syscall = SyscallNumber::try_from(nr).ok()?;
    Some(match syscall {
        SyscallNumber::Read => "read",
        SyscallNumber::Write => "write",
        SyscallNumber::Open => "open",
        SyscallNumber::Close => "close",
        SyscallNumber::Lseek => "lseek",
        SyscallNumber::Dup2 => "dup2",
        SyscallNumber::Getpid => "getpid",
        SyscallNumber::Fork => "fork",
        SyscallNumber::Execv => "execv",
        SyscallNumber::Exit => "_exit",
        SyscallNumber::Waitpid => "waitpid",
        SyscallNumber::Getcwd => "__getcwd",
        SyscallNumber::Chdir => "chdir",
        SyscallNumber::Mkdir => "mkdir",
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Syscall statistics
// ═══════════════════════════════════════════════════════════════════════

/// Numbers below this get their own counter.
const MAX_TRACKED_SYSCALL: usize = 128;

/// Per-syscall invocation counters.
struct SyscallStats {
    /// Counters for syscall numbers [0..MAX_TRACKED_SYSCALL)
    counts: [AtomicU64; MAX_TRACKED_SYSCALL],
    /// Counter for out-of-range syscall numbers
    unknown_count: AtomicU64,
    /// Total syscall invocations
    total: AtomicU64,
}

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

static SYSCALL_STATS: SyscallStats = SyscallStats {
    counts: [ZERO; MAX_TRACKED_SYSCALL],
    unknown_count: AtomicU64::new(0),
    total: AtomicU64::new(0),
};

/// Record a syscall invocation for statistics.
pub(crate) fn record_syscall(nr: u64) {
    if !is_stats_enabled() {
        return;
    }

    SYSCALL_STATS.total.fetch_add(1, Ordering::Relaxed);

    let counter = usize::try_from(nr)
        .ok()
        .and_then(|i| SYSCALL_STATS.counts.get(i))
        .unwrap_or(&SYSCALL_STATS.unknown_count);
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Get the invocation count for a specific syscall number.
pub fn get_syscall_count(nr: u64) -> u64 {
    if nr < MAX_TRACKED_SYSCALL as u64 {
        SYSCALL_STATS.counts[nr as usize].load(Ordering::Relaxed)
    } else {
        0
    }
}

/// Get the total number of syscall invocations.
pub fn get_total_syscall_count() -> u64 {
    SYSCALL_STATS.total.load(Ordering::Relaxed)
}

/// Get the number of out-of-range syscall invocations.
pub fn get_unknown_syscall_count() -> u64 {
    SYSCALL_STATS.unknown_count.load(Ordering::Relaxed)
}

/// Reset all syscall statistics.
pub fn reset_stats() {
    for counter in SYSCALL_STATS.counts.iter() {
        counter.store(0, Ordering::Relaxed);
    }
    SYSCALL_STATS.unknown_count.store(0, Ordering::Relaxed);
    SYSCALL_STATS.total.store(0, Ordering::Relaxed);
}

/// Log a summary of every syscall invoked at least once.
pub fn dump_stats() {
    log::info!(
        "[TRACE] {} syscalls ({} unknown)",
        get_total_syscall_count(),
        get_unknown_syscall_count()
    );
    for (nr, counter) in SYSCALL_STATS.counts.iter().enumerate() {
        let count = counter.load(Ordering::Relaxed);
        if count > 0 {
            let name = syscall_name(nr as u64).unwrap_or("unknown");
            log::info!("[TRACE]   {:>10} {}({})", count, name, nr);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Trace entry/exit logging
// ═══════════════════════════════════════════════════════════════════════

/// Log a syscall entry (before execution).
pub fn trace_syscall_entry(pid: i32, nr: u64, args: &[u64; 6]) {
    let name = syscall_name(nr).unwrap_or("unknown");
    log::trace!(
        "[TRACE] pid={} {}({}) args=({:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x})",
        pid,
        name,
        nr,
        args[0],
        args[1],
        args[2],
        args[3],
        args[4],
        args[5]
    );
}

/// Log a syscall exit (after execution).
pub fn trace_syscall_exit(pid: i32, nr: u64, result: &SyscallResult) {
    let name = syscall_name(nr).unwrap_or("unknown");
    match result {
        Ok(value) => log::trace!("[TRACE] pid={} {} = {:#x}", pid, name, value),
        Err(errno) => log::trace!("[TRACE] pid={} {} = -1 {}", pid, name, errno),
    }
}
