//! Condition variables.
//!
//! A waiter takes the condvar's gate spinlock before it releases the
//! paired [`Lock`], and a signaller must hold that `Lock` and then the
//! gate. A signal sent after the waiter let go of the lock therefore finds
//! it already queued. Signals with no waiter are lost; waiters re-check
//! their predicate in a loop.

use alloc::sync::Arc;

use super::{Lock, MutexGuard, SpinLock, WaitChannel};
use crate::thread::Scheduler;

/// Condition variable paired with a [`Lock`].
pub struct CondVar {
    name: &'static str,
    gate: SpinLock<()>,
    wchan: WaitChannel,
}

impl CondVar {
    /// Create a condition variable.
    pub fn new(name: &'static str, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            name,
            gate: SpinLock::new(()),
            wchan: WaitChannel::new(name, sched),
        }
    }

    /// Condition variable name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release `lock`, sleep until signalled, reacquire `lock`.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.do_i_hold(),
            "cv {}: wait without holding lock {}",
            self.name,
            lock.name()
        );

        let gate = self.gate.lock();
        lock.release();
        let gate = self.wchan.sleep(&self.gate, gate);
        drop(gate);
        lock.acquire();
    }

    /// [`wait`](Self::wait) on the lock behind a mutex guard.
    pub fn wait_guard<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.wait(guard.raw_lock());
        guard
    }

    /// Wake at most one waiter.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        self.assert_held(lock);
        let _gate = self.gate.lock();
        self.wchan.wake_one();
    }

    /// Wake every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        self.assert_held(lock);
        let _gate = self.gate.lock();
        self.wchan.wake_all();
    }

    fn assert_held(&self, lock: &Lock) {
        assert!(
            lock.do_i_hold(),
            "cv {}: signal without holding lock {}",
            self.name,
            lock.name()
        );
    }
}
