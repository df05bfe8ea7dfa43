//! Kernel configuration.
//!
//! Compile-time defaults live in the constants below; a `KernelConfig`
//! carries the values a particular kernel instance was booted with.

use crate::error::{Errno, KResult};

/// User-visible descriptor slots per process (excluding stdin/stdout/stderr).
pub const OPEN_MAX: usize = 64;

/// Descriptors reserved for stdin, stdout and stderr.
pub const RESERVED_FDS: usize = 3;

/// Lowest pid handed to user processes; pid 1 is the root process.
pub const PID_MIN: u32 = 2;

/// Highest pid.
pub const PID_MAX: u32 = 32767;

/// Upper bound on the marshalled size of an argument vector.
pub const ARG_MAX: usize = 64 * 1024;

/// Upper bound on a path copied in from user space, including the NUL.
pub const PATH_MAX: usize = 1024;

/// Device name of the console.
pub const CONSOLE_PATH: &str = "con:";

/// Per-boot kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// User descriptor slots per process; the table holds this many plus 3.
    pub max_open_files: usize,
    /// Highest pid; user pids range over `PID_MIN..=pid_max`.
    pub pid_max: u32,
    /// Byte budget for `execv` arguments (strings plus pointer array).
    pub arg_max: usize,
    /// Longest path accepted from user space.
    pub path_max: usize,
    /// Device opened for the three standard descriptors.
    pub console_path: &'static str,
    /// Trace every syscall through `log::trace!`.
    pub trace_syscalls: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_open_files: OPEN_MAX,
            pid_max: PID_MAX,
            arg_max: ARG_MAX,
            path_max: PATH_MAX,
            console_path: CONSOLE_PATH,
            trace_syscalls: cfg!(feature = "trace-syscalls"),
        }
    }
}

impl KernelConfig {
    /// Set the number of user descriptor slots.
    pub fn with_max_open_files(mut self, n: usize) -> Self {
        self.max_open_files = n;
        self
    }

    /// Set the highest pid.
    pub fn with_pid_max(mut self, pid_max: u32) -> Self {
        self.pid_max = pid_max;
        self
    }

    /// Set the `execv` argument budget.
    pub fn with_arg_max(mut self, arg_max: usize) -> Self {
        self.arg_max = arg_max;
        self
    }

    /// Enable or disable syscall tracing.
    pub fn with_trace_syscalls(mut self, on: bool) -> Self {
        self.trace_syscalls = on;
        self
    }

    /// Total slots in a descriptor table.
    pub fn fd_table_size(&self) -> usize {
        self.max_open_files + RESERVED_FDS
    }

    /// Check the configuration for values the kernel cannot run with.
    pub fn validate(&self) -> KResult<()> {
        if self.max_open_files == 0 || self.pid_max < PID_MIN {
            return Err(Errno::EINVAL);
        }
        if self.arg_max < 2 * crate::vm::WORD_SIZE || self.path_max < 2 {
            return Err(Errno::EINVAL);
        }
        if !storage::path::is_device(self.console_path) {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}
