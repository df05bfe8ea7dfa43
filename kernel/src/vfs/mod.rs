//! Per-process file layer.
//!
//! Sits between the syscall surface and the storage crate: open-file
//! handles carrying offset and access mode ([`file::OpenFile`]) and the
//! per-process descriptor table mapping small integers to them
//! ([`fd::FileTable`]).

pub mod fd;
pub mod file;

pub use fd::FileTable;
pub use file::{OpenFile, Whence};

/// Standard input descriptor.
pub const STDIN_FILENO: i32 = 0;
/// Standard output descriptor.
pub const STDOUT_FILENO: i32 = 1;
/// Standard error descriptor.
pub const STDERR_FILENO: i32 = 2;
