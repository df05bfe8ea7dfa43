//! Argument vector marshalling.
//!
//! Layout built on a fresh user stack, lowest address first:
//!
//! ```text
//!   base -> argv[0] .. argv[argc-1], NULL     (word-sized pointers)
//!           "arg0\0" pad "arg1\0" pad ...     (each padded to a word)
//!   top
//! ```
//!
//! Strings are packed downward from the top in reverse order, so
//! `argv[0]`'s string sits just above the pointer array. The initial stack
//! pointer is `base`, which is also the `argv` handed to the program.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Errno, KResult};
use crate::vm::{round_up_word, AddressSpace, UserPtr, WORD_SIZE};

/// Bytes `args` occupy on the stack: padded strings plus the
/// NULL-terminated pointer array.
pub fn required_size<S: AsRef<str>>(args: &[S]) -> usize {
    let strings: usize = args
        .iter()
        .map(|a| round_up_word(a.as_ref().len() + 1))
        .sum();
    strings + (args.len() + 1) * WORD_SIZE
}

/// `E2BIG` if `args` do not fit in `arg_max` bytes.
pub fn check_budget<S: AsRef<str>>(args: &[S], arg_max: usize) -> KResult<()> {
    if required_size(args) > arg_max {
        return Err(Errno::E2BIG);
    }
    Ok(())
}

/// A marshalled argument vector, ready to be copied to a user stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBlock {
    bytes: Vec<u8>,
    base: UserPtr,
    argc: usize,
}

impl ArgBlock {
    /// Lay out `args` below `stack_top`.
    pub fn build<S: AsRef<str>>(args: &[S], stack_top: UserPtr, arg_max: usize) -> KResult<Self> {
        check_budget(args, arg_max)?;

        let total = required_size(args);
        let top = UserPtr(stack_top.addr() & !(WORD_SIZE as u64 - 1));
        let base = top.sub(total)?;

        let mut block = Self {
            bytes: vec![0; total],
            base,
            argc: args.len(),
        };

        let mut addrs = vec![UserPtr::NULL; args.len()];
        let mut cursor = total;
        for (i, arg) in args.iter().enumerate().rev() {
            let arg = arg.as_ref().as_bytes();
            cursor = cursor
                .checked_sub(round_up_word(arg.len() + 1))
                .ok_or(Errno::E2BIG)?;
            // The NUL and the padding are already zero.
            block.put(cursor, arg)?;
            addrs[i] = base.add(cursor)?;
        }

        for (i, addr) in addrs.iter().enumerate() {
            block.put(i * WORD_SIZE, &addr.addr().to_le_bytes())?;
        }
        // argv[argc] stays NULL.

        Ok(block)
    }

    fn put(&mut self, offset: usize, data: &[u8]) -> KResult<()> {
        let end = offset.checked_add(data.len()).ok_or(Errno::E2BIG)?;
        let slot = self.bytes.get_mut(offset..end).ok_or(Errno::E2BIG)?;
        slot.copy_from_slice(data);
        Ok(())
    }

    /// Argument count.
    pub fn argc(&self) -> usize {
        self.argc
    }

    /// User address of the pointer array.
    pub fn argv(&self) -> UserPtr {
        self.base
    }

    /// Initial stack pointer for the program.
    pub fn stack_pointer(&self) -> UserPtr {
        self.base
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the block is empty (it never is: the NULL terminator is always there).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw bytes, as they will appear at [`argv`](Self::argv).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write the block to `space`.
    pub fn copy_out(&self, space: &mut dyn AddressSpace) -> KResult<()> {
        space.copy_out(&self.bytes, self.base)
    }
}

/// Copy a NULL-terminated argument vector in from user space.
///
/// The marshalled size is tracked while copying, so an oversized vector
/// fails with `E2BIG` without reading past the budget.
pub fn copy_in_argv(space: &dyn AddressSpace, argv: UserPtr, arg_max: usize) -> KResult<Vec<String>> {
    if argv.is_null() || !argv.is_aligned(WORD_SIZE) {
        return Err(Errno::EFAULT);
    }

    let mut args = Vec::new();
    // Terminating NULL.
    let mut used = WORD_SIZE;
    loop {
        let slot = argv.add(args.len() * WORD_SIZE)?;
        let ptr = UserPtr(space.copy_in_word(slot)?);
        if ptr.is_null() {
            return Ok(args);
        }

        used += WORD_SIZE;
        let room = arg_max.checked_sub(used).ok_or(Errno::E2BIG)?;
        let arg = space.copy_in_str(ptr, room).map_err(|e| match e {
            Errno::ENAMETOOLONG => Errno::E2BIG,
            other => other,
        })?;
        used += round_up_word(arg.len() + 1);
        if used > arg_max {
            return Err(Errno::E2BIG);
        }
        args.push(arg);
    }
}
