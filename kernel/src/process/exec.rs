//! Program loading: `execv` and the first-program launcher.
//!
//! The new image is built in a detached address space: open the
//! executable, create a space, load it, define the stack and copy the
//! arguments out. Only when all of that succeeded is the image swapped
//! into the process and the old space dropped. Any failure before the
//! swap drops the half-built space and leaves the process running its
//! original program.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use storage::{FileType, OpenFlags};

use super::argv::{check_budget, ArgBlock};
use super::table::Process;
use crate::error::{Errno, KResult};
use crate::system::Kernel;
use crate::thread::ProgramStart;
use crate::vm::{AddressSpace, UserPtr};

/// Last path component, used as the process name.
pub fn program_name(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == ':').find(|s| !s.is_empty()).unwrap_or(path)
}

/// A fully loaded program image not yet installed in any process.
pub struct PreparedImage {
    space: Box<dyn AddressSpace>,
    entry: UserPtr,
    args: ArgBlock,
}

impl PreparedImage {
    /// Entry point.
    pub fn entry(&self) -> UserPtr {
        self.entry
    }

    /// Marshalled arguments.
    pub fn args(&self) -> &ArgBlock {
        &self.args
    }

    /// Install the image in `process` and drop its previous address space.
    ///
    /// This is the point of no return: there is no old image to go back to.
    pub fn commit(self, process: &Process) -> ProgramStart {
        let old = process.replace_space(Some(self.space));
        process.activate_space();
        drop(old);

        ProgramStart {
            argc: self.args.argc(),
            argv: self.args.argv(),
            envp: UserPtr::NULL,
            stack_pointer: self.args.stack_pointer(),
            entry: self.entry,
        }
    }
}

impl Kernel {
    /// Load `path` with `args` into a fresh address space.
    ///
    /// `process` only supplies the working directory; nothing about it
    /// changes.
    pub fn prepare_image<S: AsRef<str>>(
        &self,
        process: &Process,
        path: &str,
        args: &[S],
    ) -> KResult<PreparedImage> {
        check_budget(args, self.config().arg_max)?;

        let path = self.resolve_path(process, path)?;
        let file = self.fs().open(&path, OpenFlags::RDONLY, 0)?;
        let meta = file.stat()?;
        if meta.file_type != FileType::Regular {
            return Err(Errno::EACCES);
        }

        let mut space = self.vm().create()?;
        let entry = self.vm().load_executable(file.as_ref(), space.as_mut())?;
        let top = space.define_stack()?;
        let args = ArgBlock::build(args, top, self.config().arg_max)?;
        args.copy_out(space.as_mut())?;

        Ok(PreparedImage { space, entry, args })
    }

    /// Replace the calling process's program.
    ///
    /// Returns only on failure, in which case the process is untouched.
    /// An empty `args` runs the program with just its path as `argv[0]`.
    pub fn execv(&self, process: &Arc<Process>, path: &str, args: Vec<String>) -> KResult<Infallible> {
        let args = if args.is_empty() {
            vec![String::from(path)]
        } else {
            args
        };

        let image = match self.prepare_image(process, path, &args) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("[KPROC] exec {} in process {} failed: {}", path, process.pid(), e);
                return Err(e);
            }
        };

        let start = image.commit(process);
        process.inner().name = String::from(program_name(path));
        log::info!(
            "[KPROC] process {} exec {} (argc {}, entry {})",
            process.pid(),
            path,
            start.argc,
            start.entry
        );
        self.scheduler().enter_new_process(start)
    }

    /// Start `path` in a new child of init, on a new thread.
    pub fn spawn_program(self: &Arc<Self>, path: &str, args: &[&str]) -> KResult<Arc<Process>> {
        let args: Vec<&str> = if args.is_empty() {
            vec![path]
        } else {
            args.to_vec()
        };
        let name = program_name(path);
        let process = self.create_process(name)?;

        let started = self.prepare_image(&process, path, &args).and_then(|image| {
            let start = image.commit(&process);
            process.inner().threads += 1;
            let sched = self.scheduler().clone();
            let proc = process.clone();
            self.scheduler().spawn(
                name,
                process.pid(),
                Box::new(move || {
                    proc.activate_space();
                    drop(proc);
                    sched.enter_new_process(start)
                }),
            )
        });

        match started {
            Ok(thread) => {
                log::info!(
                    "[KPROC] started {} as process {} (thread {})",
                    path,
                    process.pid(),
                    thread
                );
                Ok(process)
            }
            Err(e) => {
                log::warn!("[KPROC] could not start {}: {}", path, e);
                self.discard(&process);
                Err(e)
            }
        }
    }
}
