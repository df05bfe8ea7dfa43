//! `_exit` and `waitpid`.
//!
//! A process goes `Running -> Exited(status) -> reaped`. Exit publishes
//! the status and broadcasts the process's exit condition; the parent's
//! `wait` sleeps on that condition, then destroys the process and frees
//! its pid.
//!
//! Orphans go to init. A process whose parent is init (or that has no
//! parent) is reaped as soon as it exits, and a process that exits
//! holding already-exited children reaps them itself. Relinking and
//! reaping happen under the table's family lock so an exiting parent and
//! an exiting child always agree on who cleans up.

use alloc::sync::Arc;

use super::status::ExitStatus;
use super::table::{Process, ProcessId, ProcessState};
use crate::error::{Errno, KResult};
use crate::system::Kernel;

bitflags::bitflags! {
    /// `waitpid` options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        /// Return immediately if the child has not exited.
        const NOHANG = 1;
    }
}

impl WaitOptions {
    /// Decode the raw `options` argument; unknown bits are `EINVAL`.
    pub fn from_raw(raw: u64) -> KResult<Self> {
        u32::try_from(raw)
            .ok()
            .and_then(Self::from_bits)
            .ok_or(Errno::EINVAL)
    }
}

impl Kernel {
    /// Terminate the calling process with exit code `code`.
    pub fn exit(&self, process: &Arc<Process>, code: i32) -> ! {
        let status = ExitStatus::exited(code);
        log::info!("[KPROC] process {} exited with status {}", process.pid(), code & 0xff);
        self.terminate(process, status);
        self.scheduler().exit_thread()
    }

    /// Kill the calling process with signal `sig`.
    ///
    /// Used when the process cannot continue: a fault in user mode or a
    /// broken invariant after its old image is gone.
    pub fn fatal(&self, process: &Arc<Process>, sig: i32) -> ! {
        log::error!("[KPROC] process {} killed by signal {}", process.pid(), sig);
        self.terminate(process, ExitStatus::signaled(sig));
        self.scheduler().exit_thread()
    }

    fn terminate(&self, process: &Arc<Process>, status: ExitStatus) {
        let pid = process.pid();
        let table = self.processes();
        let init = self.init_process();

        let closed = process.files.close_all();
        log::debug!("[KPROC] process {} closed {} descriptors", pid, closed);

        table.family().acquire();

        let children = core::mem::take(&mut process.inner().children);
        for child_pid in children {
            let Some(child) = table.get(child_pid) else {
                continue;
            };
            match child.state() {
                ProcessState::Exited(_) => {
                    table.destroy(child_pid);
                }
                ProcessState::Running => {
                    child.inner().parent = Some(ProcessId::INIT);
                    init.inner().children.push(child_pid);
                    log::warn!("[KPROC] process {} orphaned, reparented to init", child_pid);
                }
            }
        }

        process.publish_exit(status);

        if matches!(process.parent(), None | Some(ProcessId::INIT)) {
            init.inner().children.retain(|&c| c != pid);
            table.destroy(pid);
        }

        table.family().release();
    }

    /// Wait for child `pid` of `caller` to exit and reap it.
    ///
    /// Returns `Ok(None)` when `NOHANG` is set and the child is still
    /// running.
    pub fn wait(
        &self,
        caller: &Process,
        pid: i32,
        options: WaitOptions,
    ) -> KResult<Option<(ProcessId, ExitStatus)>> {
        if pid <= 0 {
            return Err(Errno::EINVAL);
        }
        let pid = ProcessId(pid as u32);
        let table = self.processes();
        let target = table.get(pid).ok_or(Errno::ESRCH)?;

        table.family().acquire();
        let is_child = target.parent() == Some(caller.pid());
        table.family().release();
        if !is_child {
            return Err(Errno::ECHILD);
        }

        if options.contains(WaitOptions::NOHANG) && target.state() == ProcessState::Running {
            return Ok(None);
        }

        let status = target.wait_for_exit();

        table.family().acquire();
        let reaped = match table.get(pid) {
            Some(current) if Arc::ptr_eq(&current, &target) => table.destroy(pid),
            _ => None,
        };
        caller.inner().children.retain(|&c| c != pid);
        table.family().release();

        if reaped.is_none() {
            return Err(Errno::ESRCH);
        }
        log::info!("[KPROC] process {} reaped {} ({})", caller.pid(), pid, status);
        Ok(Some((pid, status)))
    }
}
