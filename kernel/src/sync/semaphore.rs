//! Counting semaphore.

use alloc::sync::Arc;

use super::{SpinLock, WaitChannel};
use crate::thread::Scheduler;

/// Counting semaphore. `p` sleeps while the count is zero; `v` never blocks.
///
/// Waiters are not served in any particular order.
pub struct Semaphore {
    name: &'static str,
    count: SpinLock<u32>,
    wchan: WaitChannel,
}

impl Semaphore {
    /// Create a semaphore with an initial count.
    pub fn new(name: &'static str, count: u32, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            name,
            count: SpinLock::new(count),
            wchan: WaitChannel::new(name, sched),
        }
    }

    /// Semaphore name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decrement, sleeping while the count is zero.
    ///
    /// # Panics
    ///
    /// Panics in interrupt context.
    pub fn p(&self) {
        assert!(
            !self.wchan.scheduler().in_interrupt(),
            "semaphore {}: P in interrupt context",
            self.name
        );

        let mut count = self.count.lock();
        while *count == 0 {
            count = self.wchan.sleep(&self.count, count);
        }
        *count -= 1;
    }

    /// Increment and wake one sleeper.
    pub fn v(&self) {
        let mut count = self.count.lock();
        *count = count
            .checked_add(1)
            .unwrap_or_else(|| panic!("semaphore {}: count overflow", self.name));
        self.wchan.wake_one();
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}
