//! Memory manager, loader and user-mode runner.
//!
//! Executables are tiny images: the magic `\x7fKXE`, four bytes of
//! padding, then the little-endian entry address. The loader maps a text
//! page at the entry and checks that a program is registered there;
//! "running" the image calls the registered closure with a [`UserEnv`].
//!
//! Forked children resume into a continuation closure parked by
//! [`UserEnv::fork`], found again through the `rip` of the child's
//! trapframe.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use storage::{Console, MemFs, Vnode};

use super::scheduler::{HostScheduler, UserMode};
use super::space::HostSpace;
use super::user::UserEnv;
use crate::config::KernelConfig;
use crate::error::{Errno, KResult};
use crate::process::status::SIGSEGV;
use crate::process::TrapFrame;
use crate::sync::SpinLock;
use crate::system::Kernel;
use crate::thread::{ProgramStart, Scheduler};
use crate::vm::{AddressSpace, MemoryManager, RegionFlags, UserPtr};

/// First four bytes of an executable image.
pub const IMAGE_MAGIC: [u8; 4] = *b"\x7fKXE";

const IMAGE_HEADER_LEN: usize = 16;
const PAGE_SIZE: u64 = 0x1000;
const TEXT_BASE: u64 = 0x40_0000;
const CONTINUATION_BASE: u64 = 0xc000_0000_0000;

/// A user program: gets its environment, returns its exit code.
pub type Program = Arc<dyn Fn(&mut UserEnv<'_>) -> i32 + Send + Sync>;

/// Body of a forked child.
pub(crate) type ChildBody = Box<dyn FnOnce(&mut UserEnv<'_>) -> i32 + Send>;

struct Continuation {
    body: ChildBody,
    argc: usize,
    argv: UserPtr,
}

/// One-shot fault injection for the memory manager.
#[derive(Debug, Default)]
pub struct Faults {
    space_create: AtomicBool,
    space_copy: AtomicBool,
}

impl Faults {
    /// Make the next address space creation fail with `ENOMEM`.
    pub fn fail_next_space_create(&self) {
        self.space_create.store(true, Ordering::SeqCst);
    }

    /// Make the next address space copy fail with `ENOMEM`.
    pub fn fail_next_space_copy(&self) {
        self.space_copy.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_space_create(&self) -> bool {
        self.space_create.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_space_copy(&self) -> bool {
        self.space_copy.swap(false, Ordering::SeqCst)
    }
}

/// The hosted machine.
pub struct HostMachine {
    sched: Arc<HostScheduler>,
    faults: Arc<Faults>,
    programs: SpinLock<HashMap<u64, Program>>,
    next_entry: AtomicU64,
    continuations: SpinLock<HashMap<u64, Continuation>>,
    next_continuation: AtomicU64,
    kernel: spin::Once<Weak<Kernel>>,
}

/// Everything [`HostMachine::boot`] brings up.
pub struct Booted {
    /// The kernel.
    pub kernel: Arc<Kernel>,
    /// Memory manager and program table.
    pub machine: Arc<HostMachine>,
    /// Scheduler.
    pub sched: Arc<HostScheduler>,
    /// Root file system.
    pub fs: Arc<MemFs>,
    /// Console behind stdin/stdout/stderr.
    pub console: Arc<Console>,
}

impl Booted {
    /// Register `main` and install its image at `path`.
    pub fn install<F>(&self, path: &str, main: F) -> KResult<u64>
    where
        F: Fn(&mut UserEnv<'_>) -> i32 + Send + Sync + 'static,
    {
        self.machine.install_program(&self.fs, path, main)
    }
}

impl HostMachine {
    /// A machine scheduling through `sched`.
    pub fn new(sched: Arc<HostScheduler>) -> Self {
        Self {
            sched,
            faults: Arc::new(Faults::default()),
            programs: SpinLock::new(HashMap::new()),
            next_entry: AtomicU64::new(TEXT_BASE),
            continuations: SpinLock::new(HashMap::new()),
            next_continuation: AtomicU64::new(CONTINUATION_BASE),
            kernel: spin::Once::new(),
        }
    }

    /// Boot a kernel on a fresh machine with an in-memory root file
    /// system and a console at `config.console_path`.
    pub fn boot(config: KernelConfig) -> KResult<Booted> {
        let sched = HostScheduler::new();
        let fs = Arc::new(MemFs::new());
        let console = Arc::new(Console::new());
        fs.attach_console(config.console_path, console.clone());

        let machine = Arc::new(HostMachine::new(sched.clone()));
        let kernel = Kernel::bootstrap(config, fs.clone(), machine.clone(), sched.clone())?;
        machine.attach(&kernel);

        Ok(Booted {
            kernel,
            machine,
            sched,
            fs,
            console,
        })
    }

    /// Connect the machine to the kernel running on it.
    pub fn attach(self: &Arc<Self>, kernel: &Arc<Kernel>) {
        self.kernel.call_once(|| Arc::downgrade(kernel));
        let mode: Arc<dyn UserMode> = self.clone();
        self.sched.set_user_mode(&mode);
    }

    /// Fault injection knobs.
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Image bytes for a program entered at `entry`.
    pub fn image(entry: u64) -> Vec<u8> {
        let mut image = Vec::with_capacity(IMAGE_HEADER_LEN);
        image.extend_from_slice(&IMAGE_MAGIC);
        image.extend_from_slice(&[0; 4]);
        image.extend_from_slice(&entry.to_le_bytes());
        image
    }

    /// Register `main`; returns its entry address.
    pub fn register_program<F>(&self, main: F) -> u64
    where
        F: Fn(&mut UserEnv<'_>) -> i32 + Send + Sync + 'static,
    {
        let entry = self.next_entry.fetch_add(PAGE_SIZE, Ordering::Relaxed);
        self.programs.lock().insert(entry, Arc::new(main));
        entry
    }

    /// Register `main` and write its executable image to `path`.
    pub fn install_program<F>(&self, fs: &MemFs, path: &str, main: F) -> KResult<u64>
    where
        F: Fn(&mut UserEnv<'_>) -> i32 + Send + Sync + 'static,
    {
        let entry = self.register_program(main);
        fs.create_file(path, &Self::image(entry), 0o755)?;
        Ok(entry)
    }

    pub(crate) fn park_continuation(&self, body: ChildBody, argc: usize, argv: UserPtr) -> u64 {
        let token = self.next_continuation.fetch_add(PAGE_SIZE, Ordering::Relaxed);
        self.continuations
            .lock()
            .insert(token, Continuation { body, argc, argv });
        token
    }

    pub(crate) fn drop_continuation(&self, token: u64) {
        self.continuations.lock().remove(&token);
    }

    fn kernel(&self) -> Option<Arc<Kernel>> {
        self.kernel.get().and_then(Weak::upgrade)
    }
}

impl MemoryManager for HostMachine {
    fn create(&self) -> KResult<Box<dyn AddressSpace>> {
        if self.faults.take_space_create() {
            return Err(Errno::ENOMEM);
        }
        Ok(Box::new(HostSpace::with_faults(self.faults.clone())))
    }

    fn load_executable(&self, file: &dyn Vnode, space: &mut dyn AddressSpace) -> KResult<UserPtr> {
        if !file.stat()?.permissions.owner_can_exec() {
            return Err(Errno::EACCES);
        }

        let mut header = [0u8; IMAGE_HEADER_LEN];
        let read = file.read_at(0, &mut header)?;
        if read < IMAGE_HEADER_LEN || header[..4] != IMAGE_MAGIC {
            return Err(Errno::ENOEXEC);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&header[8..16]);
        let entry = u64::from_le_bytes(raw);
        if !self.programs.lock().contains_key(&entry) {
            return Err(Errno::ENOEXEC);
        }

        let text = RegionFlags {
            read: true,
            write: false,
            exec: true,
        };
        space.define_region(UserPtr(entry & !(PAGE_SIZE - 1)), PAGE_SIZE as usize, text)?;
        log::debug!("[HOST] loaded image, entry {:#x}", entry);
        Ok(UserPtr(entry))
    }
}

impl UserMode for HostMachine {
    fn run_program(&self, start: ProgramStart) -> ! {
        let Some(kernel) = self.kernel() else {
            self.sched.exit_thread()
        };
        let Some(process) = kernel.current_process() else {
            self.sched.exit_thread()
        };

        let program = self.programs.lock().get(&start.entry.addr()).cloned();
        match program {
            Some(main) => {
                drop(process);
                let mut env = UserEnv::new(kernel, self, start.stack_pointer, start.argc, start.argv);
                let code = main(&mut env);
                env.exit(code)
            }
            None => kernel.fatal(&process, SIGSEGV),
        }
    }

    fn resume_forked(&self, frame: TrapFrame) -> ! {
        let Some(kernel) = self.kernel() else {
            self.sched.exit_thread()
        };
        let Some(process) = kernel.current_process() else {
            self.sched.exit_thread()
        };

        let continuation = self.continuations.lock().remove(&frame.rip);
        match continuation {
            Some(Continuation { body, argc, argv }) if frame.result() == Ok(0) => {
                drop(process);
                let mut env = UserEnv::new(kernel, self, UserPtr(frame.rsp), argc, argv);
                let code = body(&mut env);
                env.exit(code)
            }
            _ => kernel.fatal(&process, SIGSEGV),
        }
    }
}
