//! System call handling module.
//!
//! User programs trap in with the syscall number in `rax` and arguments
//! in `rdi, rsi, rdx, r10, r8, r9` (see [`TrapFrame`]). [`dispatch`]
//! decodes the number, runs the handler against the calling process and
//! stores the result back into the frame. Numbers follow Linux x86_64.

pub mod handlers;
pub mod trace;

use crate::error::Errno;
use crate::process::TrapFrame;
use crate::system::Kernel;

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallNumber {
    // ==========================================
    // File descriptors
    // ==========================================
    /// Read from a file descriptor.
    Read = 0,
    /// Write to a file descriptor.
    Write = 1,
    /// Open a file.
    Open = 2,
    /// Close a file descriptor.
    Close = 3,
    /// Reposition a descriptor's offset.
    Lseek = 8,
    /// Duplicate a descriptor onto another.
    Dup2 = 33,

    // ==========================================
    // Process lifecycle
    // ==========================================
    /// Get the caller's process id.
    Getpid = 39,
    /// Duplicate the calling process.
    Fork = 57,
    /// Replace the calling process's program.
    Execv = 59,
    /// Terminate the calling process.
    Exit = 60,
    /// Wait for a child to exit.
    Waitpid = 61,

    // ==========================================
    // Directories
    // ==========================================
    /// Copy the working directory into a user buffer.
    Getcwd = 79,
    /// Change the working directory.
    Chdir = 80,
    /// Create a directory.
    Mkdir = 83,
}

impl SyscallNumber {
    /// Every syscall, in number order.
    pub const ALL: [SyscallNumber; 14] = [
        SyscallNumber::Read,
        SyscallNumber::Write,
        SyscallNumber::Open,
        SyscallNumber::Close,
        SyscallNumber::Lseek,
        SyscallNumber::Dup2,
        SyscallNumber::Getpid,
        SyscallNumber::Fork,
        SyscallNumber::Execv,
        SyscallNumber::Exit,
        SyscallNumber::Waitpid,
        SyscallNumber::Getcwd,
        SyscallNumber::Chdir,
        SyscallNumber::Mkdir,
    ];
}

impl TryFrom<u64> for SyscallNumber {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SyscallNumber::Read),
            1 => Ok(SyscallNumber::Write),
            2 => Ok(SyscallNumber::Open),
            3 => Ok(SyscallNumber::Close),
            8 => Ok(SyscallNumber::Lseek),
            33 => Ok(SyscallNumber::Dup2),
            39 => Ok(SyscallNumber::Getpid),
            57 => Ok(SyscallNumber::Fork),
            59 => Ok(SyscallNumber::Execv),
            60 => Ok(SyscallNumber::Exit),
            61 => Ok(SyscallNumber::Waitpid),
            79 => Ok(SyscallNumber::Getcwd),
            80 => Ok(SyscallNumber::Chdir),
            83 => Ok(SyscallNumber::Mkdir),
            _ => Err(()),
        }
    }
}

/// System call result: a non-negative value or an error number.
pub type SyscallResult = Result<u64, Errno>;

/// Dispatch the system call in `frame` on behalf of the current process.
///
/// `execv` (on success) and `_exit` do not return.
pub fn dispatch(kernel: &Kernel, frame: &mut TrapFrame) {
    let nr = frame.syscall_number();
    let args = frame.args();
    trace::record_syscall(nr);

    let current = kernel.current_process();
    let pid = current.as_ref().map(|p| p.pid().as_raw()).unwrap_or(0);
    if trace::is_trace_enabled() {
        trace::trace_syscall_entry(pid, nr, &args);
    }

    let result = match (SyscallNumber::try_from(nr), current) {
        (Err(()), _) => {
            log::warn!("[SYSCALL] unknown syscall {} from process {}", nr, pid);
            Err(Errno::ENOSYS)
        }
        (Ok(_), None) => Err(Errno::ESRCH),
        (Ok(syscall), Some(process)) => handlers::handle(kernel, &process, syscall, frame),
    };

    if trace::is_trace_enabled() {
        trace::trace_syscall_exit(pid, nr, &result);
    }
    frame.set_result(result);
}
