//! Console device (`con:`).
//!
//! Input is a byte queue fed by the host; output is captured so it can
//! be inspected. Reads never block: an empty queue reads as end of file.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::vfs::Vnode;
use crate::{FileMetadata, FilePermissions, FileType, StorageError};

/// The console character device.
#[derive(Default)]
pub struct Console {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl Console {
    /// Create an empty console.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for readers of the console.
    pub fn push_input(&self, data: &[u8]) {
        self.input.lock().extend(data.iter().copied());
    }

    /// Copy of everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    /// Drain the captured output.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

/// An open handle on a console.
pub struct ConsoleHandle {
    console: Arc<Console>,
}

impl ConsoleHandle {
    /// Open a handle on `console`.
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

impl Vnode for ConsoleHandle {
    fn read_at(&self, _offset: u64, buffer: &mut [u8]) -> Result<usize, StorageError> {
        let mut input = self.console.input.lock();
        let count = buffer.len().min(input.len());
        for (slot, byte) in buffer.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_at(&self, _offset: u64, data: &[u8]) -> Result<usize, StorageError> {
        self.console.output.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn stat(&self) -> Result<FileMetadata, StorageError> {
        Ok(FileMetadata {
            file_type: FileType::CharDevice,
            permissions: FilePermissions(0o666),
            ..FileMetadata::default()
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }
}
