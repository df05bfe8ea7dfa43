//! Hosted machine.
//!
//! Implementations of the machine-dependent traits on top of the host OS,
//! so the process subsystem runs (and is tested) as an ordinary program:
//!
//! - [`HostScheduler`]: one host thread per kernel thread, sleeping by
//!   `park`/`unpark`
//! - [`HostSpace`]: an address space made of byte-vector regions
//! - [`HostMachine`]: the memory manager and loader, mapping executable
//!   entry points to Rust closures that play the user program
//! - [`UserEnv`]: the user side of the syscall interface those closures
//!   call through
//!
//! Leaving user mode for good (`_exit`, a fatal fault) unwinds the host
//! thread back to its root with a private payload.

pub mod machine;
pub mod scheduler;
pub mod space;
pub mod user;

pub use machine::{Booted, Faults, HostMachine, Program, IMAGE_MAGIC};
pub use scheduler::{HostScheduler, UserMode};
pub use space::{active_space, HostSpace, USER_STACK_SIZE, USER_STACK_TOP};
pub use user::UserEnv;
