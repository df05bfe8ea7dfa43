//! File Descriptor Table
//!
//! Maps integer file descriptors to shared open files. Every process owns
//! one table with a fixed number of slots; descriptors 0/1/2 are the
//! standard streams and `open` hands out the lowest free slot from 3 up.
//!
//! The table lock only guards the slots. I/O happens on a cloned `Arc`
//! after the lock is released, under the handle's own offset lock.

use alloc::sync::Arc;
use alloc::vec::Vec;

use storage::{FileSystem, OpenFlags};

use super::file::{OpenFile, Whence};
use crate::config::RESERVED_FDS;
use crate::error::{Errno, KResult};
use crate::sync::Mutex;
use crate::thread::Scheduler;

/// First descriptor handed out by `open`.
pub const FIRST_USER_FD: i32 = RESERVED_FDS as i32;

type Slots = Vec<Option<Arc<OpenFile>>>;

/// A per-process descriptor table.
pub struct FileTable {
    slots: Mutex<Slots>,
    sched: Arc<dyn Scheduler>,
}

impl FileTable {
    /// Create an empty table with `size` slots.
    pub fn new(size: usize, sched: Arc<dyn Scheduler>) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self {
            slots: Mutex::new("fd_table", slots, sched.clone()),
            sched,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    fn index(slots: &Slots, fd: i32) -> KResult<usize> {
        usize::try_from(fd)
            .ok()
            .filter(|&i| i < slots.len())
            .ok_or(Errno::EBADF)
    }

    // ── Standard streams ──────────────────────────────────────

    /// Bind descriptors 0, 1 and 2 to the console device.
    pub fn open_console(&self, fs: &dyn FileSystem, console: &str) -> KResult<()> {
        let modes = [OpenFlags::RDONLY, OpenFlags::WRONLY, OpenFlags::WRONLY];
        for (fd, flags) in modes.into_iter().enumerate() {
            let file = OpenFile::open(fs, console, flags, 0, self.sched.clone())?;
            self.install_at(fd as i32, file)?;
        }
        Ok(())
    }

    // ── Public API ────────────────────────────────────────────

    /// Open `path` and bind it to the lowest free descriptor ≥ 3.
    pub fn open(&self, fs: &dyn FileSystem, path: &str, flags: OpenFlags, mode: u16) -> KResult<i32> {
        let file = OpenFile::open(fs, path, flags, mode, self.sched.clone())?;
        // On EMFILE the handle is dropped here, closing the vnode.
        let fd = self.install(file)?;
        log::debug!("[FD] open {} -> fd {}", path, fd);
        Ok(fd)
    }

    /// Bind `file` to the lowest free descriptor ≥ 3.
    pub fn install(&self, file: Arc<OpenFile>) -> KResult<i32> {
        let mut slots = self.slots.lock();
        let start = FIRST_USER_FD as usize;
        let free = slots
            .iter()
            .skip(start)
            .position(|s| s.is_none())
            .ok_or(Errno::EMFILE)?;
        slots[start + free] = Some(file);
        Ok((start + free) as i32)
    }

    /// Bind `file` to `fd`, returning whatever was there.
    pub fn install_at(&self, fd: i32, file: Arc<OpenFile>) -> KResult<Option<Arc<OpenFile>>> {
        let mut slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        Ok(slots[idx].replace(file))
    }

    /// The handle behind `fd`.
    pub fn get(&self, fd: i32) -> KResult<Arc<OpenFile>> {
        let slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        slots[idx].clone().ok_or(Errno::EBADF)
    }

    /// Close `fd`. The handle is released when its last descriptor closes.
    pub fn close(&self, fd: i32) -> KResult<()> {
        let file = {
            let mut slots = self.slots.lock();
            let idx = Self::index(&slots, fd)?;
            slots[idx].take().ok_or(Errno::EBADF)?
        };
        log::debug!("[FD] close fd {} ({} refs left)", fd, file.references() - 1);
        drop(file);
        Ok(())
    }

    /// Make `new` refer to the handle behind `old`, closing `new` first.
    pub fn dup2(&self, old: i32, new: i32) -> KResult<i32> {
        let displaced = {
            let mut slots = self.slots.lock();
            let old_idx = Self::index(&slots, old)?;
            let new_idx = Self::index(&slots, new)?;
            let file = slots[old_idx].clone().ok_or(Errno::EBADF)?;
            if old_idx == new_idx {
                return Ok(new);
            }
            slots[new_idx].replace(file)
        };
        drop(displaced);
        Ok(new)
    }

    /// Read from `fd` at its handle's offset.
    pub fn read(&self, fd: i32, buffer: &mut [u8]) -> KResult<usize> {
        self.get(fd)?.read(buffer)
    }

    /// Write to `fd` at its handle's offset.
    pub fn write(&self, fd: i32, data: &[u8]) -> KResult<usize> {
        self.get(fd)?.write(data)
    }

    /// Reposition `fd`'s handle.
    pub fn seek(&self, fd: i32, offset: i64, whence: Whence) -> KResult<u64> {
        self.get(fd)?.seek(offset, whence)
    }

    /// Make this table reference the same handles, in the same slots, as `source`.
    ///
    /// Anything previously open here is closed.
    pub fn copy_from(&self, source: &FileTable) {
        let snapshot: Slots = source.slots.lock().clone();
        let previous = {
            let mut slots = self.slots.lock();
            let mut snapshot = snapshot;
            snapshot.resize_with(slots.len(), || None);
            core::mem::replace(&mut *slots, snapshot)
        };
        drop(previous);
    }

    /// A fresh table sharing every handle of this one.
    pub fn duplicate(&self) -> FileTable {
        let copy = FileTable::new(self.capacity(), self.sched.clone());
        copy.copy_from(self);
        copy
    }

    /// Close every descriptor. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let taken: Vec<Arc<OpenFile>> = {
            let mut slots = self.slots.lock();
            slots.iter_mut().filter_map(Option::take).collect()
        };
        taken.len()
    }
}
