//! Synchronization primitives.
//!
//! Two layers:
//! - spinlocks (`spin::Mutex`) for short critical sections that never sleep
//! - sleeping primitives built on [`WaitChannel`]: [`Semaphore`], [`Lock`],
//!   [`CondVar`] and the data-carrying [`Mutex`]
//!
//! Sleeping primitives hold an `Arc<dyn Scheduler>` so they can block the
//! current thread and wake others.

pub mod condvar;
pub mod lock;
pub mod semaphore;
pub mod wchan;

pub use condvar::CondVar;
pub use lock::{Lock, Mutex, MutexGuard};
pub use semaphore::Semaphore;
pub use wchan::WaitChannel;

/// Busy-waiting lock for short, non-blocking critical sections.
pub type SpinLock<T> = spin::Mutex<T>;

/// Guard of a [`SpinLock`].
pub type SpinLockGuard<'a, T> = spin::MutexGuard<'a, T>;
