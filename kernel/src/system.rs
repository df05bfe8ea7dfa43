//! The kernel instance.
//!
//! `Kernel` ties the process table to the machine services it runs on:
//! the root file system, the memory manager and the scheduler. There are
//! no global singletons; everything is reached through the instance
//! created by [`Kernel::bootstrap`].

use alloc::string::String;
use alloc::sync::Arc;

use storage::FileSystem;

use crate::config::{KernelConfig, PID_MIN};
use crate::error::{Errno, KResult};
use crate::process::{Process, ProcessId, ProcessTable};
use crate::syscall::trace;
use crate::thread::Scheduler;
use crate::vm::MemoryManager;

/// A running kernel.
pub struct Kernel {
    config: KernelConfig,
    fs: Arc<dyn FileSystem>,
    vm: Arc<dyn MemoryManager>,
    sched: Arc<dyn Scheduler>,
    processes: ProcessTable,
    init: Arc<Process>,
}

impl Kernel {
    /// Bring up the process subsystem on top of the given machine services.
    pub fn bootstrap(
        config: KernelConfig,
        fs: Arc<dyn FileSystem>,
        vm: Arc<dyn MemoryManager>,
        sched: Arc<dyn Scheduler>,
    ) -> KResult<Arc<Self>> {
        config.validate()?;

        let processes = ProcessTable::new(
            PID_MIN,
            config.pid_max,
            config.fd_table_size(),
            sched.clone(),
        );
        let init = processes.create_init()?;

        if config.trace_syscalls {
            trace::enable_trace();
        }

        log::info!(
            "[KPROC] kernel up: {} fds/process, pids {}..={}, arg_max {}",
            config.fd_table_size(),
            PID_MIN,
            config.pid_max,
            config.arg_max
        );

        Ok(Arc::new(Self {
            config,
            fs,
            vm,
            sched,
            processes,
            init,
        }))
    }

    /// Boot configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Root file system.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Memory manager.
    pub fn vm(&self) -> &Arc<dyn MemoryManager> {
        &self.vm
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    /// Process table.
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// The root process.
    pub fn init_process(&self) -> &Arc<Process> {
        &self.init
    }

    /// Create a user process under init with the console on fds 0-2.
    ///
    /// The process has no address space and no thread yet.
    pub fn create_process(&self, name: &str) -> KResult<Arc<Process>> {
        let process = self.processes.create(name, "/")?;
        if let Err(e) = process
            .files
            .open_console(self.fs.as_ref(), self.config.console_path)
        {
            self.processes.destroy(process.pid());
            return Err(e);
        }
        self.processes.add_child(&self.init, &process);
        Ok(process)
    }

    /// Process the calling thread belongs to.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.sched
            .current_process()
            .and_then(|pid| self.processes.get(pid))
    }

    /// Look up a process.
    pub fn process(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.processes.get(pid)
    }

    /// Make `path` absolute against `process`'s working directory.
    pub fn resolve_path(&self, process: &Process, path: &str) -> KResult<String> {
        if path.len() >= self.config.path_max {
            return Err(Errno::ENAMETOOLONG);
        }
        Ok(storage::path::resolve(&process.cwd(), path)?)
    }
}
