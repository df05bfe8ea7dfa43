//! Wait status encoding.
//!
//! The low two bits tag how a process ended, the rest carries the exit
//! code or signal number:
//! - exited: `code << 2`
//! - killed by a signal: `(sig << 2) | 1`

use core::fmt;

const WAIT_EXITED: i32 = 0;
const WAIT_SIGNALED: i32 = 1;

/// Segmentation violation, used when the kernel kills a process.
pub const SIGSEGV: i32 = 11;
/// Kill signal.
pub const SIGKILL: i32 = 9;

/// Encode a normal exit. Only the low 8 bits of `code` survive.
pub const fn mkwait_exit(code: i32) -> i32 {
    ((code & 0xff) << 2) | WAIT_EXITED
}

/// Encode death by signal.
pub const fn mkwait_sig(sig: i32) -> i32 {
    (sig << 2) | WAIT_SIGNALED
}

/// WIFEXITED
pub const fn wifexited(status: i32) -> bool {
    status & 3 == WAIT_EXITED
}

/// WEXITSTATUS
pub const fn wexitstatus(status: i32) -> i32 {
    status >> 2
}

/// WIFSIGNALED
pub const fn wifsignaled(status: i32) -> bool {
    status & 3 == WAIT_SIGNALED
}

/// WTERMSIG
pub const fn wtermsig(status: i32) -> i32 {
    status >> 2
}

/// An encoded wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Normal exit with `code`.
    pub const fn exited(code: i32) -> Self {
        ExitStatus(mkwait_exit(code))
    }

    /// Killed by `sig`.
    pub const fn signaled(sig: i32) -> Self {
        ExitStatus(mkwait_sig(sig))
    }

    /// Wrap a raw encoded status.
    pub const fn from_raw(raw: i32) -> Self {
        ExitStatus(raw)
    }

    /// Raw encoded value, as stored through `waitpid`'s status pointer.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Exit code, if the process exited normally.
    pub const fn code(self) -> Option<i32> {
        if wifexited(self.0) {
            Some(wexitstatus(self.0))
        } else {
            None
        }
    }

    /// Signal number, if the process was killed.
    pub const fn signal(self) -> Option<i32> {
        if wifsignaled(self.0) {
            Some(wtermsig(self.0))
        } else {
            None
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code(), self.signal()) {
            (Some(code), _) => write!(f, "exit {}", code),
            (_, Some(sig)) => write!(f, "signal {}", sig),
            _ => write!(f, "raw {:#x}", self.0),
        }
    }
}
