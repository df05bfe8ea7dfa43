//! Virtual memory interface.
//!
//! Address spaces are owned values: a process holds
//! `Box<dyn AddressSpace>` and destroying the space is dropping the box.
//! All transfers between kernel and user memory go through
//! `copy_in`/`copy_out`, which fail with `EFAULT` on unmapped addresses.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use storage::Vnode;

use crate::error::{Errno, KResult};

/// Size of a user pointer in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<u64>();

/// A user-space virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UserPtr(pub u64);

impl UserPtr {
    /// The null pointer.
    pub const NULL: UserPtr = UserPtr(0);

    /// Whether this is the null pointer.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw address.
    pub fn addr(self) -> u64 {
        self.0
    }

    /// `self + bytes`, or `EFAULT` on overflow.
    pub fn add(self, bytes: usize) -> KResult<UserPtr> {
        self.0
            .checked_add(bytes as u64)
            .map(UserPtr)
            .ok_or(Errno::EFAULT)
    }

    /// `self - bytes`, or `EFAULT` on underflow.
    pub fn sub(self, bytes: usize) -> KResult<UserPtr> {
        self.0
            .checked_sub(bytes as u64)
            .map(UserPtr)
            .ok_or(Errno::EFAULT)
    }

    /// Whether the address is a multiple of `align`.
    pub fn is_aligned(self, align: usize) -> bool {
        self.0 % align as u64 == 0
    }
}

impl fmt::Display for UserPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Round `len` up to a multiple of the word size.
pub const fn round_up_word(len: usize) -> usize {
    (len + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// Access rights of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFlags {
    /// Readable.
    pub read: bool,
    /// Writable.
    pub write: bool,
    /// Executable.
    pub exec: bool,
}

/// A user address space.
pub trait AddressSpace: Send {
    /// Duplicate the space (contents included) for a forked child.
    fn copy(&self) -> KResult<Box<dyn AddressSpace>>;

    /// Make this space the one the MMU translates through.
    fn activate(&self);

    /// Map `size` bytes at `base`.
    fn define_region(&mut self, base: UserPtr, size: usize, flags: RegionFlags) -> KResult<()>;

    /// Map the user stack; returns the initial (top) stack pointer.
    fn define_stack(&mut self) -> KResult<UserPtr>;

    /// Copy `dst.len()` bytes from user address `src`.
    fn copy_in(&self, src: UserPtr, dst: &mut [u8]) -> KResult<()>;

    /// Copy `src` to user address `dst`.
    fn copy_out(&mut self, src: &[u8], dst: UserPtr) -> KResult<()>;

    /// Copy a NUL-terminated string of at most `max` bytes (NUL included).
    ///
    /// `ENAMETOOLONG` if no NUL appears within `max` bytes, `EINVAL` if
    /// the bytes are not UTF-8.
    fn copy_in_str(&self, src: UserPtr, max: usize) -> KResult<String> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..max {
            self.copy_in(src.add(i)?, &mut byte)?;
            if byte[0] == 0 {
                return String::from_utf8(bytes).map_err(|_| Errno::EINVAL);
            }
            bytes.push(byte[0]);
        }
        Err(Errno::ENAMETOOLONG)
    }

    /// Read one user word.
    fn copy_in_word(&self, src: UserPtr) -> KResult<u64> {
        let mut raw = [0u8; WORD_SIZE];
        self.copy_in(src, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Write one user word.
    fn copy_out_word(&mut self, value: u64, dst: UserPtr) -> KResult<()> {
        self.copy_out(&value.to_le_bytes(), dst)
    }

    /// Write `s` followed by a NUL.
    fn copy_out_str(&mut self, s: &str, dst: UserPtr) -> KResult<()> {
        self.copy_out(s.as_bytes(), dst)?;
        self.copy_out(&[0], dst.add(s.len())?)
    }
}

/// Creates address spaces and loads executables into them.
pub trait MemoryManager: Send + Sync {
    /// A new, empty address space.
    fn create(&self) -> KResult<Box<dyn AddressSpace>>;

    /// Load the executable in `file` into `space`; returns the entry point.
    fn load_executable(&self, file: &dyn Vnode, space: &mut dyn AddressSpace) -> KResult<UserPtr>;
}
