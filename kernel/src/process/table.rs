//! Process Control Blocks and the process table.
//!
//! The table owns every live process (`Arc<Process>`) keyed by pid. A
//! process refers to its parent by pid and lists its children by pid, so
//! the family graph holds no reference cycles; the table is the only
//! place pids are turned back into processes.
//!
//! Lock order: `family` lock, then a process's `inner` mutex. The table's
//! `RwLock` and the pid allocator's spinlock are leaf locks and are never
//! held across anything that sleeps.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::RwLock;

use super::status::ExitStatus;
use crate::error::{Errno, KResult};
use crate::sync::{CondVar, Lock, Mutex, MutexGuard, SpinLock};
use crate::thread::Scheduler;
use crate::vfs::FileTable;
use crate::vm::AddressSpace;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Root process; adopts and reaps orphans.
    pub const INIT: ProcessId = ProcessId(1);

    /// Get the raw ID value as user space sees it.
    pub fn as_raw(&self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is running (or runnable)
    Running,
    /// Process has exited and its status awaits collection
    Exited(ExitStatus),
}

/// Mutable process fields, guarded by the process mutex.
#[derive(Debug)]
pub struct ProcessInner {
    /// Process name
    pub name: String,
    /// Parent process, looked up through the table
    pub parent: Option<ProcessId>,
    /// Children not yet reaped
    pub children: Vec<ProcessId>,
    /// Lifecycle state
    pub state: ProcessState,
    /// Live threads
    pub threads: usize,
    /// Current working directory (absolute, normalised)
    pub cwd: String,
}

/// Process Control Block
pub struct Process {
    pid: ProcessId,
    inner: Mutex<ProcessInner>,
    /// Signalled (broadcast) when the process exits.
    exit_cv: CondVar,
    /// Descriptor table
    pub files: FileTable,
    space: SpinLock<Option<Box<dyn AddressSpace>>>,
}

impl Process {
    fn new(
        pid: ProcessId,
        name: &str,
        cwd: &str,
        fd_slots: usize,
        sched: &Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            pid,
            inner: Mutex::new(
                "proc",
                ProcessInner {
                    name: String::from(name),
                    parent: None,
                    children: Vec::new(),
                    state: ProcessState::Running,
                    threads: 0,
                    cwd: String::from(cwd),
                },
                sched.clone(),
            ),
            exit_cv: CondVar::new("proc_exit", sched.clone()),
            files: FileTable::new(fd_slots, sched.clone()),
            space: SpinLock::new(None),
        }
    }

    /// Process id.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Lock the mutable fields.
    pub fn inner(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    /// Process name.
    pub fn name(&self) -> String {
        self.inner().name.clone()
    }

    /// Parent pid.
    pub fn parent(&self) -> Option<ProcessId> {
        self.inner().parent
    }

    /// Current working directory.
    pub fn cwd(&self) -> String {
        self.inner().cwd.clone()
    }

    /// Lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.inner().state
    }

    /// Pids of unreaped children.
    pub fn children(&self) -> Vec<ProcessId> {
        self.inner().children.clone()
    }

    /// Mark the process exited and wake everyone waiting for it.
    pub(crate) fn publish_exit(&self, status: ExitStatus) {
        let mut inner = self.inner();
        inner.state = ProcessState::Exited(status);
        inner.threads = inner.threads.saturating_sub(1);
        self.exit_cv.broadcast(inner.raw_lock());
    }

    /// Sleep until the process has exited; returns its status.
    pub fn wait_for_exit(&self) -> ExitStatus {
        let mut inner = self.inner();
        loop {
            if let ProcessState::Exited(status) = inner.state {
                return status;
            }
            inner = self.exit_cv.wait_guard(inner);
        }
    }

    // ── Address space ─────────────────────────────────────────

    /// Run `f` on the address space, if there is one.
    pub fn with_space<R>(&self, f: impl FnOnce(&mut dyn AddressSpace) -> R) -> Option<R> {
        let mut space = self.space.lock();
        space.as_deref_mut().map(|s| f(s))
    }

    /// Install `space`, returning the previous one.
    pub fn replace_space(
        &self,
        space: Option<Box<dyn AddressSpace>>,
    ) -> Option<Box<dyn AddressSpace>> {
        core::mem::replace(&mut *self.space.lock(), space)
    }

    /// Whether an address space is installed.
    pub fn has_space(&self) -> bool {
        self.space.lock().is_some()
    }

    /// Activate the installed address space.
    pub fn activate_space(&self) {
        if let Some(space) = self.space.lock().as_ref() {
            space.activate();
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("pid", &self.pid).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pid allocation
// ═══════════════════════════════════════════════════════════════════════

/// Bounded pid allocator. Hands out pids next-fit so a released pid is
/// not reused until the range wraps.
struct PidAllocator {
    min: u32,
    max: u32,
    next: u32,
    in_use: BTreeSet<u32>,
}

impl PidAllocator {
    fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            next: min,
            in_use: BTreeSet::new(),
        }
    }

    fn alloc(&mut self) -> Option<ProcessId> {
        let span = self.max - self.min + 1;
        for _ in 0..span {
            let candidate = self.next;
            self.next = if self.next == self.max {
                self.min
            } else {
                self.next + 1
            };
            if self.in_use.insert(candidate) {
                return Some(ProcessId(candidate));
            }
        }
        None
    }

    fn release(&mut self, pid: ProcessId) {
        self.in_use.remove(&pid.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Process table
// ═══════════════════════════════════════════════════════════════════════

/// All live processes.
pub struct ProcessTable {
    /// All processes indexed by PID
    processes: RwLock<BTreeMap<ProcessId, Arc<Process>>>,
    pids: SpinLock<PidAllocator>,
    /// Serialises changes to parent/child links.
    family: Lock,
    fd_slots: usize,
    sched: Arc<dyn Scheduler>,
}

impl ProcessTable {
    /// Create a table handing out pids in `min..=max`.
    pub fn new(min: u32, max: u32, fd_slots: usize, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
            pids: SpinLock::new(PidAllocator::new(min, max)),
            family: Lock::new("proc_family", sched.clone()),
            fd_slots,
            sched,
        }
    }

    /// The lock serialising parent/child relinking.
    pub fn family(&self) -> &Lock {
        &self.family
    }

    /// Register the root process under [`ProcessId::INIT`].
    pub fn create_init(&self) -> KResult<Arc<Process>> {
        let mut processes = self.processes.write();
        if processes.contains_key(&ProcessId::INIT) {
            return Err(Errno::EEXIST);
        }
        let init = Arc::new(Process::new(
            ProcessId::INIT,
            "init",
            "/",
            self.fd_slots,
            &self.sched,
        ));
        processes.insert(ProcessId::INIT, init.clone());
        Ok(init)
    }

    /// Allocate a pid and register a new, parentless process with an
    /// empty descriptor table.
    pub fn create(&self, name: &str, cwd: &str) -> KResult<Arc<Process>> {
        let pid = self.pids.lock().alloc().ok_or(Errno::ENPROC)?;
        let process = Arc::new(Process::new(pid, name, cwd, self.fd_slots, &self.sched));
        self.processes.write().insert(pid, process.clone());
        log::debug!("[PROC] created {} ({})", pid, name);
        Ok(process)
    }

    /// Link `child` under `parent`.
    ///
    /// If `parent` has already exited (or is gone) the child is handed to
    /// init instead. Returns the pid the child ended up under.
    pub fn add_child(&self, parent: &Process, child: &Process) -> ProcessId {
        self.family.acquire();
        let adopted_by = {
            let mut p = parent.inner();
            let alive = p.state == ProcessState::Running && self.get(parent.pid()).is_some();
            if alive {
                p.children.push(child.pid());
                parent.pid()
            } else {
                ProcessId::INIT
            }
        };
        if adopted_by == ProcessId::INIT && parent.pid() != ProcessId::INIT {
            if let Some(init) = self.get(ProcessId::INIT) {
                init.inner().children.push(child.pid());
            }
        }
        child.inner().parent = Some(adopted_by);
        self.family.release();
        adopted_by
    }

    /// Undo [`add_child`](Self::add_child).
    pub fn unlink_child(&self, parent: ProcessId, child: &Process) {
        self.family.acquire();
        if let Some(p) = self.get(parent) {
            p.inner().children.retain(|&c| c != child.pid());
        }
        child.inner().parent = None;
        self.family.release();
    }

    /// Get a process by PID.
    pub fn get(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.processes.read().get(&pid).cloned()
    }

    /// Alias of [`get`](Self::get).
    pub fn search_by_pid(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.get(pid)
    }

    /// Remove `pid` and release everything it owns: address space,
    /// descriptors and the pid itself.
    ///
    /// Returns `None` if the pid is not registered, so of two racing
    /// destroyers exactly one wins.
    pub fn destroy(&self, pid: ProcessId) -> Option<Arc<Process>> {
        let process = self.processes.write().remove(&pid)?;
        drop(process.replace_space(None));
        process.files.close_all();
        if pid != ProcessId::INIT {
            self.pids.lock().release(pid);
        }
        log::debug!("[PROC] destroyed {}", pid);
        Some(process)
    }

    /// Get count of processes
    pub fn count(&self) -> usize {
        self.processes.read().len()
    }

    /// Registered pids in ascending order.
    pub fn pids(&self) -> Vec<ProcessId> {
        self.processes.read().keys().copied().collect()
    }
}
