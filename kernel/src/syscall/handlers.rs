//! System call handlers.
//!
//! Each handler decodes its raw register arguments, copies whatever it
//! needs in from user memory before acting, and returns the value for
//! `rax`. Argument validation happens before any state changes.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use storage::OpenFlags;

use super::{SyscallNumber, SyscallResult};
use crate::error::{Errno, KResult};
use crate::process::argv::copy_in_argv;
use crate::process::{Process, TrapFrame, WaitOptions};
use crate::system::Kernel;
use crate::vfs::Whence;
use crate::vm::UserPtr;

/// Largest transfer a single `read` or `write` performs.
pub const MAX_IO_CHUNK: usize = 64 * 1024;

/// Handle a system call.
pub fn handle(
    kernel: &Kernel,
    process: &Arc<Process>,
    syscall: SyscallNumber,
    frame: &TrapFrame,
) -> SyscallResult {
    let args = frame.args();
    match syscall {
        SyscallNumber::Open => handle_open(kernel, process, &args),
        SyscallNumber::Close => handle_close(process, &args),
        SyscallNumber::Read => handle_read(process, &args),
        SyscallNumber::Write => handle_write(process, &args),
        SyscallNumber::Lseek => handle_lseek(process, &args),
        SyscallNumber::Dup2 => handle_dup2(process, &args),
        SyscallNumber::Fork => handle_fork(kernel, process, frame),
        SyscallNumber::Execv => handle_execv(kernel, process, &args),
        SyscallNumber::Exit => handle_exit(kernel, process, &args),
        SyscallNumber::Waitpid => handle_waitpid(kernel, process, &args),
        SyscallNumber::Getpid => Ok(process.pid().as_raw() as u64),
        SyscallNumber::Chdir => handle_chdir(kernel, process, &args),
        SyscallNumber::Getcwd => handle_getcwd(process, &args),
        SyscallNumber::Mkdir => handle_mkdir(kernel, process, &args),
    }
}

// ── User memory helpers ───────────────────────────────────────

/// Copy a NUL-terminated path in from user space.
fn copy_in_path(kernel: &Kernel, process: &Process, ptr: u64) -> KResult<String> {
    let ptr = UserPtr(ptr);
    if ptr.is_null() {
        return Err(Errno::EFAULT);
    }
    let max = kernel.config().path_max;
    process
        .with_space(|space| space.copy_in_str(ptr, max))
        .unwrap_or(Err(Errno::EFAULT))
}

fn copy_in(process: &Process, src: UserPtr, dst: &mut [u8]) -> KResult<()> {
    if src.is_null() {
        return Err(Errno::EFAULT);
    }
    process
        .with_space(|space| space.copy_in(src, dst))
        .unwrap_or(Err(Errno::EFAULT))
}

fn copy_out(process: &Process, src: &[u8], dst: UserPtr) -> KResult<()> {
    if dst.is_null() {
        return Err(Errno::EFAULT);
    }
    process
        .with_space(|space| space.copy_out(src, dst))
        .unwrap_or(Err(Errno::EFAULT))
}

// ── File descriptors ──────────────────────────────────────────

/// open(path, flags, mode)
fn handle_open(kernel: &Kernel, process: &Process, args: &[u64; 6]) -> SyscallResult {
    let path = copy_in_path(kernel, process, args[0])?;
    let flags = u32::try_from(args[1])
        .ok()
        .and_then(OpenFlags::from_bits)
        .ok_or(Errno::EINVAL)?;
    let mode = (args[2] & 0o7777) as u16;

    let path = kernel.resolve_path(process, &path)?;
    let fd = process.files.open(kernel.fs().as_ref(), &path, flags, mode)?;
    Ok(fd as u64)
}

/// close(fd)
fn handle_close(process: &Process, args: &[u64; 6]) -> SyscallResult {
    process.files.close(args[0] as i32)?;
    Ok(0)
}

/// read(fd, buf, len)
fn handle_read(process: &Process, args: &[u64; 6]) -> SyscallResult {
    let fd = args[0] as i32;
    let buf = UserPtr(args[1]);
    let len = (args[2] as usize).min(MAX_IO_CHUNK);

    let file = process.files.get(fd)?;
    if !file.access().can_read() {
        return Err(Errno::EBADF);
    }
    let mut kbuf = vec![0u8; len];
    // The whole buffer must be writable before the offset moves.
    copy_out(process, &kbuf, buf)?;
    let count = file.read(&mut kbuf)?;
    copy_out(process, &kbuf[..count], buf)?;
    Ok(count as u64)
}

/// write(fd, buf, len)
fn handle_write(process: &Process, args: &[u64; 6]) -> SyscallResult {
    let fd = args[0] as i32;
    let buf = UserPtr(args[1]);
    let len = (args[2] as usize).min(MAX_IO_CHUNK);

    let file = process.files.get(fd)?;
    let mut kbuf = vec![0u8; len];
    copy_in(process, buf, &mut kbuf)?;
    let count = file.write(&kbuf)?;
    Ok(count as u64)
}

/// lseek(fd, offset, whence)
fn handle_lseek(process: &Process, args: &[u64; 6]) -> SyscallResult {
    let whence = Whence::from_raw(args[2] as i32)?;
    process.files.seek(args[0] as i32, args[1] as i64, whence)
}

/// dup2(oldfd, newfd)
fn handle_dup2(process: &Process, args: &[u64; 6]) -> SyscallResult {
    let fd = process.files.dup2(args[0] as i32, args[1] as i32)?;
    Ok(fd as u64)
}

// ── Processes ─────────────────────────────────────────────────

/// fork()
fn handle_fork(kernel: &Kernel, process: &Arc<Process>, frame: &TrapFrame) -> SyscallResult {
    let child = kernel.fork(process, frame)?;
    Ok(child.as_raw() as u64)
}

/// execv(path, argv)
fn handle_execv(kernel: &Kernel, process: &Arc<Process>, args: &[u64; 6]) -> SyscallResult {
    let path = copy_in_path(kernel, process, args[0])?;
    let arg_max = kernel.config().arg_max;
    let argv = process
        .with_space(|space| copy_in_argv(space, UserPtr(args[1]), arg_max))
        .unwrap_or(Err(Errno::EFAULT))?;

    match kernel.execv(process, &path, argv)? {}
}

/// _exit(code)
fn handle_exit(kernel: &Kernel, process: &Arc<Process>, args: &[u64; 6]) -> SyscallResult {
    kernel.exit(process, args[0] as i32)
}

/// waitpid(pid, status, options)
///
/// A NULL status pointer is allowed and means the status is discarded.
/// The pointer must be writable; that is checked before the caller
/// sleeps, since the child is gone once it has been reaped.
fn handle_waitpid(kernel: &Kernel, process: &Process, args: &[u64; 6]) -> SyscallResult {
    let pid = args[0] as i32;
    let status_ptr = UserPtr(args[1]);
    let options = WaitOptions::from_raw(args[2])?;

    if !status_ptr.is_null() {
        if !status_ptr.is_aligned(core::mem::size_of::<i32>()) {
            return Err(Errno::EFAULT);
        }
        let mut current = [0u8; 4];
        copy_in(process, status_ptr, &mut current)?;
        copy_out(process, &current, status_ptr)?;
    }

    match kernel.wait(process, pid, options)? {
        None => Ok(0),
        Some((reaped, status)) => {
            if !status_ptr.is_null() {
                copy_out(process, &status.raw().to_le_bytes(), status_ptr)?;
            }
            Ok(reaped.as_raw() as u64)
        }
    }
}

// ── Directories ───────────────────────────────────────────────

/// chdir(path)
fn handle_chdir(kernel: &Kernel, process: &Process, args: &[u64; 6]) -> SyscallResult {
    let path = copy_in_path(kernel, process, args[0])?;
    if path.contains("//") {
        return Err(Errno::EINVAL);
    }
    let resolved = kernel.resolve_path(process, &path)?;
    if !kernel.fs().lookup(&resolved)?.is_dir() {
        return Err(Errno::ENOTDIR);
    }
    log::debug!("[KPROC] process {} chdir {}", process.pid(), resolved);
    process.inner().cwd = resolved;
    Ok(0)
}

/// __getcwd(buf, len)
///
/// Copies the working directory without a trailing NUL and returns its
/// length.
fn handle_getcwd(process: &Process, args: &[u64; 6]) -> SyscallResult {
    let buf = UserPtr(args[0]);
    let len = args[1] as usize;
    if len == 0 {
        return Err(Errno::EINVAL);
    }
    let cwd = process.cwd();
    if cwd.len() > len {
        return Err(Errno::ERANGE);
    }
    copy_out(process, cwd.as_bytes(), buf)?;
    Ok(cwd.len() as u64)
}

/// mkdir(path, mode)
fn handle_mkdir(kernel: &Kernel, process: &Process, args: &[u64; 6]) -> SyscallResult {
    let path = copy_in_path(kernel, process, args[0])?;
    let resolved = kernel.resolve_path(process, &path)?;
    kernel.fs().mkdir(&resolved, (args[1] & 0o7777) as u16)?;
    Ok(0)
}
