//! Trap Frame
//!
//! Register snapshot taken when a user thread enters the kernel.
//!
//! System call convention:
//! - `rax`: syscall number
//! - `rdi, rsi, rdx, r10, r8, r9`: arguments 1-6
//!
//! On return `rax` holds the result (or `-1`) and `rdx` the error number
//! (0 on success).

use crate::error::Errno;

/// Saved user register state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    // General purpose registers (callee-saved first)
    /// R15 register
    pub r15: u64,
    /// R14 register
    pub r14: u64,
    /// R13 register
    pub r13: u64,
    /// R12 register
    pub r12: u64,
    /// RBX register
    pub rbx: u64,
    /// RBP register (frame pointer)
    pub rbp: u64,

    // Caller-saved registers
    /// R11 register
    pub r11: u64,
    /// R10 register
    pub r10: u64,
    /// R9 register
    pub r9: u64,
    /// R8 register
    pub r8: u64,
    /// RDI register
    pub rdi: u64,
    /// RSI register
    pub rsi: u64,
    /// RDX register
    pub rdx: u64,
    /// RCX register
    pub rcx: u64,
    /// RAX register
    pub rax: u64,

    /// Instruction pointer
    pub rip: u64,
    /// RFLAGS register
    pub rflags: u64,
    /// Stack pointer
    pub rsp: u64,
}

impl TrapFrame {
    /// Frame for invoking syscall `number` with `args`.
    pub fn for_syscall(number: u64, args: [u64; 6]) -> Self {
        Self {
            rax: number,
            rdi: args[0],
            rsi: args[1],
            rdx: args[2],
            r10: args[3],
            r8: args[4],
            r9: args[5],
            ..Self::default()
        }
    }

    /// Syscall number.
    pub fn syscall_number(&self) -> u64 {
        self.rax
    }

    /// Syscall arguments in order.
    pub fn args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    /// Store a syscall result.
    pub fn set_result(&mut self, result: Result<u64, Errno>) {
        match result {
            Ok(value) => {
                self.rax = value;
                self.rdx = 0;
            }
            Err(errno) => {
                self.rax = -1i64 as u64;
                self.rdx = errno.code() as u64;
            }
        }
    }

    /// Decode a result stored by [`set_result`](Self::set_result).
    pub fn result(&self) -> Result<u64, Errno> {
        if self.rdx == 0 {
            Ok(self.rax)
        } else {
            Err(Errno::from_code(self.rdx as i32).unwrap_or(Errno::EINVAL))
        }
    }

    /// The child's view of `fork`: returns 0, no error.
    pub fn set_fork_child_return(&mut self) {
        self.set_result(Ok(0));
    }
}
