//! `fork`: duplicate the calling process.
//!
//! The child gets a copy of the parent's address space, a descriptor
//! table sharing every open handle, and a new thread that resumes from a
//! copy of the parent's trapframe with a zero return value. Nothing the
//! parent can observe changes unless every step succeeds.

use alloc::boxed::Box;
use alloc::sync::Arc;

use super::context::TrapFrame;
use super::table::{Process, ProcessId};
use crate::error::{Errno, KResult};
use crate::system::Kernel;

impl Kernel {
    /// Fork `parent`, which trapped in with `frame`. Returns the child's pid.
    pub fn fork(&self, parent: &Arc<Process>, frame: &TrapFrame) -> KResult<ProcessId> {
        let child = self.processes().create(&parent.name(), &parent.cwd())?;

        match self.fork_into(parent, &child, frame) {
            Ok(()) => {
                log::info!("[KPROC] fork {} -> {}", parent.pid(), child.pid());
                Ok(child.pid())
            }
            Err(e) => {
                log::warn!("[KPROC] fork of {} failed: {}", parent.pid(), e);
                self.discard(&child);
                Err(e)
            }
        }
    }

    fn fork_into(&self, parent: &Arc<Process>, child: &Arc<Process>, frame: &TrapFrame) -> KResult<()> {
        let space = parent
            .with_space(|space| space.copy())
            .unwrap_or(Err(Errno::EINVAL))?;
        child.replace_space(Some(space));

        let mut child_frame = *frame;
        child_frame.set_fork_child_return();

        self.processes().add_child(parent, child);
        child.files.copy_from(&parent.files);

        child.inner().threads += 1;
        let sched = self.scheduler().clone();
        let proc = child.clone();
        self.scheduler().spawn(
            &parent.name(),
            child.pid(),
            Box::new(move || {
                proc.activate_space();
                drop(proc);
                sched.enter_forked_process(child_frame)
            }),
        )?;
        Ok(())
    }

    /// Tear down a process that never ran: unlink it from its parent and
    /// destroy it.
    pub(crate) fn discard(&self, process: &Process) {
        if let Some(parent) = process.parent() {
            self.processes().unlink_child(parent, process);
        }
        self.processes().destroy(process.pid());
    }
}
