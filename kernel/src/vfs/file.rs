//! Open-file handles.
//!
//! An `OpenFile` is what `open` creates and what descriptors point at.
//! Several descriptors (after `dup2`) and several processes (after
//! `fork`) may share one handle through `Arc`; they then share its
//! offset. The vnode is closed when the last `Arc` goes away.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use storage::{AccessMode, FileSystem, OpenFlags, Vnode};

use crate::error::{Errno, KResult};
use crate::sync::Mutex;
use crate::thread::Scheduler;

/// Origin of an `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// SEEK_SET: from the start of the file.
    Set,
    /// SEEK_CUR: from the current offset.
    Current,
    /// SEEK_END: from the end of the file.
    End,
}

impl Whence {
    /// Decode the raw `whence` argument.
    pub fn from_raw(raw: i32) -> KResult<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            _ => Err(Errno::EINVAL),
        }
    }
}

/// A shared open file.
pub struct OpenFile {
    path: String,
    vnode: Box<dyn Vnode>,
    access: AccessMode,
    append: bool,
    offset: Mutex<u64>,
}

impl OpenFile {
    /// Open `path` (already resolved) through `fs`.
    pub fn open(
        fs: &dyn FileSystem,
        path: &str,
        flags: OpenFlags,
        mode: u16,
        sched: Arc<dyn Scheduler>,
    ) -> KResult<Arc<Self>> {
        let access = flags.access_mode()?;
        let vnode = fs.open(path, flags, mode)?;
        Ok(Arc::new(Self {
            path: String::from(path),
            vnode,
            access,
            append: flags.contains(OpenFlags::APPEND),
            offset: Mutex::new("file_offset", 0, sched),
        }))
    }

    /// Path the handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Access mode.
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Current offset.
    pub fn offset(&self) -> u64 {
        *self.offset.lock()
    }

    /// Number of descriptors (in any table) referring to this handle.
    pub fn references(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }

    /// Read at the current offset and advance it.
    pub fn read(&self, buffer: &mut [u8]) -> KResult<usize> {
        if !self.access.can_read() {
            return Err(Errno::EBADF);
        }
        let mut offset = self.offset.lock();
        let count = self.vnode.read_at(*offset, buffer)?;
        if self.vnode.is_seekable() {
            *offset += count as u64;
        }
        Ok(count)
    }

    /// Write at the current offset (the end, with `O_APPEND`) and advance it.
    pub fn write(&self, data: &[u8]) -> KResult<usize> {
        if !self.access.can_write() {
            return Err(Errno::EBADF);
        }
        let mut offset = self.offset.lock();
        if self.append {
            *offset = self.vnode.stat()?.size;
        }
        let count = self.vnode.write_at(*offset, data)?;
        if self.vnode.is_seekable() {
            *offset += count as u64;
        }
        Ok(count)
    }

    /// Move the offset; returns the new offset.
    pub fn seek(&self, pos: i64, whence: Whence) -> KResult<u64> {
        if !self.vnode.is_seekable() {
            return Err(Errno::ESPIPE);
        }
        let mut offset = self.offset.lock();
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => *offset as i64,
            Whence::End => self.vnode.stat()?.size as i64,
        };
        let target = base.checked_add(pos).ok_or(Errno::EINVAL)?;
        if target < 0 {
            return Err(Errno::EINVAL);
        }
        *offset = target as u64;
        Ok(*offset)
    }
}
