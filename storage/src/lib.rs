//! Storage layer for KPROC.
//!
//! This crate provides the pieces of the file system that the process
//! subsystem talks to:
//! - the `FileSystem` / `Vnode` traits (the VFS contract)
//! - open flags and access modes
//! - path normalisation against a working directory
//! - `MemFs`, an in-memory tree used as the root file system
//! - `Console`, the `con:` character device backing stdin/stdout/stderr

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod console;
pub mod memfs;
pub mod path;
pub mod vfs;

pub use console::Console;
pub use memfs::MemFs;
pub use vfs::{FileSystem, Vnode};

/// Storage subsystem error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Device I/O error.
    IoError,
    /// Unsupported operation.
    Unsupported,
    /// File not found.
    FileNotFound,
    /// Not a directory.
    NotADirectory,
    /// Is a directory.
    IsADirectory,
    /// Already exists.
    AlreadyExists,
    /// Permission denied.
    PermissionDenied,
    /// Directory not empty.
    DirectoryNotEmpty,
    /// No space left on device.
    NoSpace,
    /// Write past the largest supported file size.
    FileTooLarge,
    /// Invalid path.
    InvalidPath,
    /// Name too long.
    NameTooLong,
    /// Invalid argument.
    InvalidArgument,
    /// Object does not support seeking.
    NotSeekable,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            StorageError::IoError => "I/O error",
            StorageError::Unsupported => "operation not supported",
            StorageError::FileNotFound => "no such file or directory",
            StorageError::NotADirectory => "not a directory",
            StorageError::IsADirectory => "is a directory",
            StorageError::AlreadyExists => "file exists",
            StorageError::PermissionDenied => "permission denied",
            StorageError::DirectoryNotEmpty => "directory not empty",
            StorageError::NoSpace => "no space left on device",
            StorageError::FileTooLarge => "file too large",
            StorageError::InvalidPath => "invalid path",
            StorageError::NameTooLong => "name too long",
            StorageError::InvalidArgument => "invalid argument",
            StorageError::NotSeekable => "illegal seek",
        };
        f.write_str(msg)
    }
}

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Character device.
    CharDevice,
}

/// File permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions(pub u16);

impl FilePermissions {
    /// Owner read permission.
    pub const OWNER_READ: u16 = 0o400;
    /// Owner write permission.
    pub const OWNER_WRITE: u16 = 0o200;
    /// Owner execute permission.
    pub const OWNER_EXEC: u16 = 0o100;

    /// Default file permissions (rw-r--r--).
    pub const DEFAULT_FILE: Self = FilePermissions(0o644);
    /// Default directory permissions (rwxr-xr-x).
    pub const DEFAULT_DIR: Self = FilePermissions(0o755);

    /// Build from a `mode` argument, keeping only the permission bits.
    pub const fn from_mode(mode: u16) -> Self {
        FilePermissions(mode & 0o777)
    }

    /// Check if owner can execute.
    pub fn owner_can_exec(&self) -> bool {
        self.0 & Self::OWNER_EXEC != 0
    }
}

/// File metadata/attributes.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File type.
    pub file_type: FileType,
    /// File permissions.
    pub permissions: FilePermissions,
    /// File size in bytes.
    pub size: u64,
    /// Number of hard links.
    pub nlink: u32,
    /// Inode number.
    pub inode: u64,
}

impl FileMetadata {
    /// Whether this object is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

impl Default for FileMetadata {
    fn default() -> Self {
        FileMetadata {
            file_type: FileType::Regular,
            permissions: FilePermissions::DEFAULT_FILE,
            size: 0,
            nlink: 1,
            inode: 0,
        }
    }
}

bitflags::bitflags! {
    /// Flags for opening files.
    ///
    /// The low two bits hold the access mode (`O_RDONLY` is the empty set).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for writing only.
        const WRONLY = 0x0001;
        /// Open for reading and writing.
        const RDWR = 0x0002;
        /// Mask for the access mode bits.
        const ACCMODE = 0x0003;
        /// Create if not exists.
        const CREAT = 0x0004;
        /// Exclusive create (fail if exists).
        const EXCL = 0x0008;
        /// Truncate to zero length.
        const TRUNC = 0x0010;
        /// Append mode.
        const APPEND = 0x0020;
    }
}

impl OpenFlags {
    /// Open for reading only.
    pub const RDONLY: Self = Self::empty();

    /// Decode the access mode. Both access bits set is rejected.
    pub fn access_mode(&self) -> Result<AccessMode, StorageError> {
        match self.bits() & Self::ACCMODE.bits() {
            0 => Ok(AccessMode::ReadOnly),
            1 => Ok(AccessMode::WriteOnly),
            2 => Ok(AccessMode::ReadWrite),
            _ => Err(StorageError::InvalidArgument),
        }
    }
}

/// Access mode of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only.
    ReadOnly,
    /// Writes only.
    WriteOnly,
    /// Reads and writes.
    ReadWrite,
}

impl AccessMode {
    /// Whether reads are permitted.
    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Whether writes are permitted.
    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}
