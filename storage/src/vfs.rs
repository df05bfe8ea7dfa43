//! Virtual Filesystem (VFS) contract.
//!
//! The process subsystem never sees a concrete filesystem; it opens
//! vnodes through `FileSystem` and performs positioned I/O on them.
//! Closing a vnode is dropping its handle.

use alloc::boxed::Box;

use crate::{FileMetadata, OpenFlags, StorageError};

/// Maximum path length.
pub const MAX_PATH_LEN: usize = 1024;

/// Maximum filename length.
pub const MAX_NAME_LEN: usize = 255;

/// An open file-system object.
///
/// Implementations must tolerate concurrent calls; callers serialise
/// offset bookkeeping themselves.
pub trait Vnode: Send + Sync {
    /// Read into `buffer` starting at `offset`. Returns bytes read; 0 at end of file.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, StorageError>;

    /// Write `data` at `offset`. Returns bytes written.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, StorageError>;

    /// Get metadata.
    fn stat(&self) -> Result<FileMetadata, StorageError>;

    /// Whether the object has a meaningful position (devices do not).
    fn is_seekable(&self) -> bool {
        true
    }
}

/// A mounted file system.
///
/// Paths are absolute and normalised (see [`crate::path`]) or device
/// names of the form `name:`.
pub trait FileSystem: Send + Sync {
    /// Open (and with `CREAT`, create) a file.
    fn open(&self, path: &str, flags: OpenFlags, mode: u16) -> Result<Box<dyn Vnode>, StorageError>;

    /// Create a directory.
    fn mkdir(&self, path: &str, mode: u16) -> Result<(), StorageError>;

    /// Look up a file or directory.
    fn lookup(&self, path: &str) -> Result<FileMetadata, StorageError>;
}
