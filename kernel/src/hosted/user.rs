//! User side of the syscall interface.
//!
//! A [`UserEnv`] is what a hosted program sees: its arguments, its stack,
//! and wrappers that marshal arguments into user memory, build a
//! trapframe and trap into [`syscall::dispatch`]. Buffers the kernel must
//! read or fill are placed on the user stack below the stack pointer.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use storage::OpenFlags;

use super::machine::HostMachine;
use crate::error::{Errno, KResult};
use crate::process::status::SIGSEGV;
use crate::process::{ExitStatus, Process, ProcessId, TrapFrame, WaitOptions};
use crate::syscall::{self, SyscallNumber};
use crate::system::Kernel;
use crate::vm::{UserPtr, WORD_SIZE};

/// Bump allocator for call arguments, growing down from the stack pointer.
struct Scratch {
    next: u64,
}

impl Scratch {
    fn below(sp: UserPtr) -> Self {
        Self { next: sp.addr() }
    }

    fn reserve(&mut self, len: usize) -> KResult<UserPtr> {
        let size = (len as u64 + WORD_SIZE as u64) & !(WORD_SIZE as u64 - 1);
        self.next = self.next.checked_sub(size).ok_or(Errno::EFAULT)?;
        Ok(UserPtr(self.next))
    }
}

/// A running hosted program.
pub struct UserEnv<'m> {
    kernel: Arc<Kernel>,
    machine: &'m HostMachine,
    sp: UserPtr,
    argc: usize,
    argv: UserPtr,
}

impl<'m> UserEnv<'m> {
    pub(crate) fn new(
        kernel: Arc<Kernel>,
        machine: &'m HostMachine,
        sp: UserPtr,
        argc: usize,
        argv: UserPtr,
    ) -> Self {
        Self {
            kernel,
            machine,
            sp,
            argc,
            argv,
        }
    }

    /// The kernel this program runs on.
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Argument count passed at startup.
    pub fn argc(&self) -> usize {
        self.argc
    }

    /// User address of the argument pointer array.
    pub fn argv(&self) -> UserPtr {
        self.argv
    }

    /// Stack pointer at startup (or at the fork).
    pub fn stack_pointer(&self) -> UserPtr {
        self.sp
    }

    fn process(&self) -> KResult<Arc<Process>> {
        self.kernel.current_process().ok_or(Errno::ESRCH)
    }

    // ── User memory ───────────────────────────────────────────

    /// Read `len` bytes of this program's memory.
    pub fn peek(&self, addr: UserPtr, len: usize) -> KResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.process()?
            .with_space(|space| space.copy_in(addr, &mut buf))
            .unwrap_or(Err(Errno::EFAULT))?;
        Ok(buf)
    }

    /// Write `data` into this program's memory.
    pub fn poke(&self, addr: UserPtr, data: &[u8]) -> KResult<()> {
        self.process()?
            .with_space(|space| space.copy_out(data, addr))
            .unwrap_or(Err(Errno::EFAULT))
    }

    fn peek_word(&self, addr: UserPtr) -> KResult<u64> {
        let mut raw = [0u8; WORD_SIZE];
        raw.copy_from_slice(&self.peek(addr, WORD_SIZE)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read the NUL-terminated string at `addr`.
    pub fn peek_str(&self, addr: UserPtr) -> KResult<String> {
        let max = self.kernel.config().arg_max;
        self.process()?
            .with_space(|space| space.copy_in_str(addr, max))
            .unwrap_or(Err(Errno::EFAULT))
    }

    /// `argv[0..argc]` as user addresses. `EINVAL` if `argv[argc]` is not NULL.
    pub fn argv_pointers(&self) -> KResult<Vec<UserPtr>> {
        let mut pointers = Vec::with_capacity(self.argc);
        for i in 0..self.argc {
            pointers.push(UserPtr(self.peek_word(self.argv.add(i * WORD_SIZE)?)?));
        }
        if self.peek_word(self.argv.add(self.argc * WORD_SIZE)?)? != 0 {
            return Err(Errno::EINVAL);
        }
        Ok(pointers)
    }

    /// The argument strings.
    pub fn args(&self) -> KResult<Vec<String>> {
        self.argv_pointers()?
            .into_iter()
            .map(|ptr| self.peek_str(ptr))
            .collect()
    }

    fn push_bytes(&self, scratch: &mut Scratch, data: &[u8]) -> KResult<UserPtr> {
        let at = scratch.reserve(data.len())?;
        self.poke(at, data)?;
        Ok(at)
    }

    fn push_str(&self, scratch: &mut Scratch, s: &str) -> KResult<UserPtr> {
        let at = scratch.reserve(s.len() + 1)?;
        self.poke(at, s.as_bytes())?;
        self.poke(at.add(s.len())?, &[0])?;
        Ok(at)
    }

    // ── Traps ─────────────────────────────────────────────────

    /// Trap into the kernel with `frame`.
    pub fn trap(&mut self, frame: &mut TrapFrame) {
        frame.rsp = self.sp.addr();
        syscall::dispatch(&self.kernel, frame);
    }

    /// Issue syscall `nr` with raw register arguments.
    pub fn raw_syscall(&mut self, nr: u64, args: [u64; 6]) -> KResult<u64> {
        let mut frame = TrapFrame::for_syscall(nr, args);
        self.trap(&mut frame);
        frame.result()
    }

    fn call(&mut self, syscall: SyscallNumber, args: [u64; 6]) -> KResult<u64> {
        self.raw_syscall(syscall as u64, args)
    }

    /// open(2)
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: u16) -> KResult<i32> {
        let mut scratch = Scratch::below(self.sp);
        let path = self.push_str(&mut scratch, path)?;
        let fd = self.call(
            SyscallNumber::Open,
            [path.addr(), flags.bits() as u64, mode as u64, 0, 0, 0],
        )?;
        Ok(fd as i32)
    }

    /// close(2)
    pub fn close(&mut self, fd: i32) -> KResult<()> {
        self.call(SyscallNumber::Close, [fd as u64, 0, 0, 0, 0, 0])?;
        Ok(())
    }

    /// read(2)
    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> KResult<usize> {
        let mut scratch = Scratch::below(self.sp);
        let at = scratch.reserve(buf.len())?;
        let count = self.call(
            SyscallNumber::Read,
            [fd as u64, at.addr(), buf.len() as u64, 0, 0, 0],
        )? as usize;
        buf[..count].copy_from_slice(&self.peek(at, count)?);
        Ok(count)
    }

    /// write(2)
    pub fn write(&mut self, fd: i32, data: &[u8]) -> KResult<usize> {
        let mut scratch = Scratch::below(self.sp);
        let at = self.push_bytes(&mut scratch, data)?;
        let count = self.call(
            SyscallNumber::Write,
            [fd as u64, at.addr(), data.len() as u64, 0, 0, 0],
        )?;
        Ok(count as usize)
    }

    /// Write `text` to standard output.
    pub fn print(&mut self, text: &str) -> KResult<usize> {
        self.write(1, text.as_bytes())
    }

    /// lseek(2)
    pub fn lseek(&mut self, fd: i32, offset: i64, whence: i32) -> KResult<u64> {
        self.call(
            SyscallNumber::Lseek,
            [fd as u64, offset as u64, whence as u64, 0, 0, 0],
        )
    }

    /// dup2(2)
    pub fn dup2(&mut self, old: i32, new: i32) -> KResult<i32> {
        let fd = self.call(SyscallNumber::Dup2, [old as u64, new as u64, 0, 0, 0, 0])?;
        Ok(fd as i32)
    }

    /// getpid(2)
    pub fn getpid(&mut self) -> KResult<ProcessId> {
        let pid = self.call(SyscallNumber::Getpid, [0; 6])?;
        Ok(ProcessId(pid as u32))
    }

    /// fork(2). The child runs `child` and exits with its return value;
    /// the parent gets the child's pid.
    pub fn fork<F>(&mut self, child: F) -> KResult<ProcessId>
    where
        F: FnOnce(&mut UserEnv<'_>) -> i32 + Send + 'static,
    {
        let token = self
            .machine
            .park_continuation(Box::new(child), self.argc, self.argv);
        let mut frame = TrapFrame::for_syscall(SyscallNumber::Fork as u64, [0; 6]);
        frame.rip = token;
        self.trap(&mut frame);
        match frame.result() {
            Ok(pid) => Ok(ProcessId(pid as u32)),
            Err(e) => {
                self.machine.drop_continuation(token);
                Err(e)
            }
        }
    }

    /// execv(2). Returns only on failure.
    pub fn execv(&mut self, path: &str, args: &[&str]) -> Errno {
        match self.execv_inner(path, args) {
            Ok(()) => Errno::EINVAL,
            Err(e) => e,
        }
    }

    fn execv_inner(&mut self, path: &str, args: &[&str]) -> KResult<()> {
        let mut scratch = Scratch::below(self.sp);
        let mut pointers = Vec::with_capacity(args.len() + 1);
        for arg in args {
            pointers.push(self.push_str(&mut scratch, arg)?.addr());
        }
        pointers.push(0);
        let array: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        let argv = self.push_bytes(&mut scratch, &array)?;
        let path = self.push_str(&mut scratch, path)?;
        self.call(SyscallNumber::Execv, [path.addr(), argv.addr(), 0, 0, 0, 0])?;
        Ok(())
    }

    /// _exit(2)
    pub fn exit(&mut self, code: i32) -> ! {
        let _ = self.call(SyscallNumber::Exit, [code as u64, 0, 0, 0, 0, 0]);
        self.kernel.scheduler().exit_thread()
    }

    /// Die as if by an unhandled memory fault.
    pub fn crash(&mut self) -> ! {
        match self.process() {
            Ok(process) => self.kernel.fatal(&process, SIGSEGV),
            Err(_) => self.kernel.scheduler().exit_thread(),
        }
    }

    /// waitpid(2). `Ok(None)` is the `WNOHANG` "still running" answer.
    pub fn waitpid(
        &mut self,
        pid: ProcessId,
        options: WaitOptions,
    ) -> KResult<Option<(ProcessId, ExitStatus)>> {
        let mut scratch = Scratch::below(self.sp);
        let status = scratch.reserve(4)?;
        let reaped = self.call(
            SyscallNumber::Waitpid,
            [pid.as_raw() as u64, status.addr(), options.bits() as u64, 0, 0, 0],
        )?;
        if reaped == 0 {
            return Ok(None);
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.peek(status, 4)?);
        Ok(Some((ProcessId(reaped as u32), ExitStatus::from_raw(i32::from_le_bytes(raw)))))
    }

    /// waitpid(2) with raw arguments.
    pub fn waitpid_raw(&mut self, pid: i32, status: u64, options: u64) -> KResult<u64> {
        self.call(
            SyscallNumber::Waitpid,
            [pid as i64 as u64, status, options, 0, 0, 0],
        )
    }

    /// chdir(2)
    pub fn chdir(&mut self, path: &str) -> KResult<()> {
        let mut scratch = Scratch::below(self.sp);
        let path = self.push_str(&mut scratch, path)?;
        self.call(SyscallNumber::Chdir, [path.addr(), 0, 0, 0, 0, 0])?;
        Ok(())
    }

    /// __getcwd(2)
    pub fn getcwd(&mut self) -> KResult<String> {
        let len = self.kernel.config().path_max;
        let mut scratch = Scratch::below(self.sp);
        let buf = scratch.reserve(len)?;
        let count = self.call(SyscallNumber::Getcwd, [buf.addr(), len as u64, 0, 0, 0, 0])?;
        String::from_utf8(self.peek(buf, count as usize)?).map_err(|_| Errno::EINVAL)
    }

    /// mkdir(2)
    pub fn mkdir(&mut self, path: &str, mode: u16) -> KResult<()> {
        let mut scratch = Scratch::below(self.sp);
        let path = self.push_str(&mut scratch, path)?;
        self.call(SyscallNumber::Mkdir, [path.addr(), mode as u64, 0, 0, 0, 0])?;
        Ok(())
    }
}
