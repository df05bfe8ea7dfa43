//! Wait channels.
//!
//! A wait channel is a FIFO of sleeping threads. Sleepers enqueue
//! themselves while still holding the spinlock that protects the
//! condition they are waiting on; wakers must hold that same spinlock.
//! A wakeup therefore either finds the sleeper queued or happens before
//! the sleeper checked its condition, so none is lost.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use super::{SpinLock, SpinLockGuard};
use crate::thread::{Scheduler, ThreadId};

struct Waiter {
    thread: ThreadId,
    woken: AtomicBool,
}

/// A queue of threads sleeping on some condition.
pub struct WaitChannel {
    name: &'static str,
    sched: Arc<dyn Scheduler>,
    waiters: SpinLock<VecDeque<Arc<Waiter>>>,
}

impl WaitChannel {
    /// Create an empty channel.
    pub fn new(name: &'static str, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            name,
            sched,
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Channel name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Scheduler this channel sleeps through.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    /// Sleep until woken, releasing `guard` (a guard of `lock`) meanwhile.
    ///
    /// The lock is reacquired before returning.
    pub fn sleep<'a, T>(
        &self,
        lock: &'a SpinLock<T>,
        guard: SpinLockGuard<'a, T>,
    ) -> SpinLockGuard<'a, T> {
        assert!(
            !self.sched.in_interrupt(),
            "wchan {}: sleeping in interrupt context",
            self.name
        );

        let waiter = Arc::new(Waiter {
            thread: self.sched.current_thread(),
            woken: AtomicBool::new(false),
        });
        self.waiters.lock().push_back(waiter.clone());
        drop(guard);

        while !waiter.woken.load(Ordering::Acquire) {
            self.sched.block();
        }

        lock.lock()
    }

    /// Wake the longest sleeper, if any. Returns whether one was woken.
    pub fn wake_one(&self) -> bool {
        let waiter = self.waiters.lock().pop_front();
        match waiter {
            Some(waiter) => {
                waiter.woken.store(true, Ordering::Release);
                self.sched.unblock(waiter.thread);
                true
            }
            None => false,
        }
    }

    /// Wake every sleeper. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let waiters: VecDeque<_> = core::mem::take(&mut *self.waiters.lock());
        let count = waiters.len();
        for waiter in waiters {
            waiter.woken.store(true, Ordering::Release);
            self.sched.unblock(waiter.thread);
        }
        count
    }

    /// Whether nobody is sleeping here.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}
