//! KPROC Kernel Library
//!
//! Process and execution subsystem of the kernel: per-process file
//! descriptor tables, `fork`/`execv`/`_exit`/`waitpid`, and the sleeping
//! synchronization primitives they are built on.
//!
//! The machine-dependent services this subsystem leans on (thread
//! dispatch, address spaces, the executable loader, the file system) are
//! reached through traits:
//!
//! - [`thread::Scheduler`]
//! - [`vm::AddressSpace`] and [`vm::MemoryManager`]
//! - [`storage::FileSystem`] and [`storage::Vnode`]
//!
//! With the `std` feature, [`hosted`] provides implementations backed by
//! host threads so the whole subsystem can run as an ordinary program.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod system;
pub mod thread;
pub mod vfs;
pub mod vm;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

pub use config::KernelConfig;
pub use error::{Errno, KResult};
pub use process::{ExitStatus, Process, ProcessId};
pub use system::Kernel;
