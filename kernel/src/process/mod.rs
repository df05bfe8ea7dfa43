//! Process Management
//!
//! Process control blocks and the table that owns them, plus the
//! lifecycle operations built on top: `fork`, `execv`, `_exit` and
//! `waitpid`. The operations are methods on [`crate::Kernel`] and live in
//! their own files here.

pub mod argv;
pub mod context;
pub mod exec;
pub mod fork;
pub mod status;
pub mod table;
pub mod wait;

pub use argv::ArgBlock;
pub use context::TrapFrame;
pub use exec::PreparedImage;
pub use status::ExitStatus;
pub use table::{Process, ProcessId, ProcessInner, ProcessState, ProcessTable};
pub use wait::WaitOptions;
