//! Region-based user address space.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

use super::machine::Faults;
use crate::error::{Errno, KResult};
use crate::vm::{AddressSpace, RegionFlags, UserPtr};

/// Initial user stack pointer.
pub const USER_STACK_TOP: u64 = 0x8000_0000;

/// Size of the user stack region.
pub const USER_STACK_SIZE: usize = 256 * 1024;

static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static ACTIVE: Cell<u64> = const { Cell::new(0) };
}

/// Id of the space last activated on this thread (0 if none).
pub fn active_space() -> u64 {
    ACTIVE.with(Cell::get)
}

#[derive(Clone)]
struct Region {
    base: u64,
    flags: RegionFlags,
    data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn overlaps(&self, base: u64, end: u64) -> bool {
        base < self.end() && self.base < end
    }
}

/// A user address space backed by host memory.
pub struct HostSpace {
    id: u64,
    regions: Vec<Region>,
    stack_top: Option<UserPtr>,
    faults: Option<Arc<Faults>>,
}

impl Default for HostSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSpace {
    /// An empty space.
    pub fn new() -> Self {
        Self {
            id: NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed),
            regions: Vec::new(),
            stack_top: None,
            faults: None,
        }
    }

    pub(crate) fn with_faults(faults: Arc<Faults>) -> Self {
        Self {
            faults: Some(faults),
            ..Self::new()
        }
    }

    /// Unique id of this space.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of mapped regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The region holding `[addr, addr + len)` and the offset of `addr` in it.
    fn locate(&self, addr: UserPtr, len: usize) -> KResult<(usize, usize)> {
        let end = addr.add(len)?.addr();
        self.regions
            .iter()
            .position(|r| r.base <= addr.addr() && end <= r.end())
            .map(|i| (i, (addr.addr() - self.regions[i].base) as usize))
            .ok_or(Errno::EFAULT)
    }
}

impl AddressSpace for HostSpace {
    fn copy(&self) -> KResult<Box<dyn AddressSpace>> {
        if self.faults.as_ref().is_some_and(|f| f.take_space_copy()) {
            return Err(Errno::ENOMEM);
        }
        Ok(Box::new(HostSpace {
            id: NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed),
            regions: self.regions.clone(),
            stack_top: self.stack_top,
            faults: self.faults.clone(),
        }))
    }

    fn activate(&self) {
        ACTIVE.with(|active| active.set(self.id));
    }

    fn define_region(&mut self, base: UserPtr, size: usize, flags: RegionFlags) -> KResult<()> {
        if size == 0 || base.is_null() {
            return Err(Errno::EINVAL);
        }
        let end = base.add(size)?.addr();
        if self.regions.iter().any(|r| r.overlaps(base.addr(), end)) {
            return Err(Errno::EINVAL);
        }
        self.regions.push(Region {
            base: base.addr(),
            flags,
            data: vec![0; size],
        });
        Ok(())
    }

    fn define_stack(&mut self) -> KResult<UserPtr> {
        if let Some(top) = self.stack_top {
            return Ok(top);
        }
        let base = UserPtr(USER_STACK_TOP - USER_STACK_SIZE as u64);
        let rw = RegionFlags {
            read: true,
            write: true,
            exec: false,
        };
        self.define_region(base, USER_STACK_SIZE, rw)?;
        let top = UserPtr(USER_STACK_TOP);
        self.stack_top = Some(top);
        Ok(top)
    }

    fn copy_in(&self, src: UserPtr, dst: &mut [u8]) -> KResult<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let (i, offset) = self.locate(src, dst.len())?;
        let region = &self.regions[i];
        if !region.flags.read {
            return Err(Errno::EFAULT);
        }
        dst.copy_from_slice(&region.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn copy_out(&mut self, src: &[u8], dst: UserPtr) -> KResult<()> {
        if src.is_empty() {
            return Ok(());
        }
        let (i, offset) = self.locate(dst, src.len())?;
        let region = &mut self.regions[i];
        if !region.flags.write {
            return Err(Errno::EFAULT);
        }
        region.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}
