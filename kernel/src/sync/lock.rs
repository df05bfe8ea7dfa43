//! Sleeping locks.
//!
//! [`Lock`] is the bare mutual-exclusion primitive with an owner; it is
//! what condition variables pair with. [`Mutex`] wraps a value behind a
//! `Lock` and hands out RAII guards.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use super::{SpinLock, WaitChannel};
use crate::thread::{Scheduler, ThreadId};

// ═══════════════════════════════════════════════════════════════════════
// Lock
// ═══════════════════════════════════════════════════════════════════════

/// A sleeping lock with an owner.
///
/// # Panics
///
/// - `acquire` by the current owner (locks are not re-entrant)
/// - `release` by anyone but the owner
/// - `acquire` in interrupt context
pub struct Lock {
    name: &'static str,
    owner: SpinLock<Option<ThreadId>>,
    wchan: WaitChannel,
}

impl Lock {
    /// Create an unheld lock.
    pub fn new(name: &'static str, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            name,
            owner: SpinLock::new(None),
            wchan: WaitChannel::new(name, sched),
        }
    }

    /// Lock name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        self.wchan.scheduler()
    }

    /// Acquire, sleeping while another thread holds the lock.
    pub fn acquire(&self) {
        let sched = self.scheduler();
        assert!(
            !sched.in_interrupt(),
            "lock {}: acquire in interrupt context",
            self.name
        );
        let me = sched.current_thread();

        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            panic!("lock {}: re-entrant acquire by thread {}", self.name, me);
        }
        while owner.is_some() {
            owner = self.wchan.sleep(&self.owner, owner);
        }
        *owner = Some(me);
    }

    /// Release and wake one waiter.
    pub fn release(&self) {
        let me = self.scheduler().current_thread();
        let mut owner = self.owner.lock();
        if *owner != Some(me) {
            panic!(
                "lock {}: released by thread {} but held by {:?}",
                self.name, me, *owner
            );
        }
        *owner = None;
        self.wchan.wake_one();
    }

    /// Whether the current thread holds this lock.
    pub fn do_i_hold(&self) -> bool {
        *self.owner.lock() == Some(self.scheduler().current_thread())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mutex<T>
// ═══════════════════════════════════════════════════════════════════════

/// Sleeping mutex protecting a value.
pub struct Mutex<T: ?Sized> {
    lock: Lock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialised by `lock`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// SAFETY: access to `data` is serialised by `lock`.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex.
    pub fn new(name: &'static str, value: T, sched: Arc<dyn Scheduler>) -> Self {
        Mutex {
            lock: Lock::new(name, sched),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, sleeping until available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.acquire();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// The underlying lock, for pairing with a [`super::CondVar`].
    pub fn raw_lock(&self) -> &Lock {
        &self.lock
    }

    /// Returns a mutable reference to the underlying data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for Mutex. Must be dropped on the thread that locked it.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// The lock this guard holds.
    pub fn raw_lock(&self) -> &'a Lock {
        &self.mutex.lock
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
