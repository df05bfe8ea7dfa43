//! Host-thread scheduler.
//!
//! Each kernel thread is a host thread. `block` parks it and `unblock`
//! unparks it; a host park token is remembered if the unpark comes first,
//! which is exactly the wakeup-before-sleep behaviour [`Scheduler::block`]
//! requires. Threads that were not spawned here (a test's main thread,
//! say) are registered the first time they ask who they are.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::{Arc, Weak};
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, Thread};

use hashbrown::HashMap;

use crate::error::{Errno, KResult};
use crate::process::{ProcessId, TrapFrame};
use crate::sync::SpinLock;
use crate::thread::{ProgramStart, Scheduler, ThreadEntry, ThreadId};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT_THREAD: Cell<Option<ThreadId>> = const { Cell::new(None) };
    static CURRENT_PID: Cell<Option<ProcessId>> = const { Cell::new(None) };
}

/// Unwind payload that ends a kernel thread.
struct ThreadExit;

/// Where threads go when they enter user mode.
pub trait UserMode: Send + Sync {
    /// Run a freshly loaded program on the current thread.
    fn run_program(&self, start: ProgramStart) -> !;

    /// Resume a forked child from its trapframe.
    fn resume_forked(&self, frame: TrapFrame) -> !;
}

/// Scheduler backed by host threads.
pub struct HostScheduler {
    me: Weak<HostScheduler>,
    threads: SpinLock<HashMap<ThreadId, Thread>>,
    user_mode: spin::Once<Weak<dyn UserMode>>,
    live: AtomicUsize,
    fail_spawn: AtomicBool,
}

impl HostScheduler {
    /// Create a scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            threads: SpinLock::new(HashMap::new()),
            user_mode: spin::Once::new(),
            live: AtomicUsize::new(0),
            fail_spawn: AtomicBool::new(false),
        })
    }

    /// Attach the user-mode implementation threads enter.
    pub fn set_user_mode(&self, mode: &Arc<dyn UserMode>) {
        self.user_mode.call_once(|| Arc::downgrade(mode));
    }

    /// Make the next `spawn` fail with `ENOMEM`.
    pub fn fail_next_spawn(&self) {
        self.fail_spawn.store(true, Ordering::SeqCst);
    }

    /// Spawned threads that have not finished.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn user_mode(&self) -> Option<Arc<dyn UserMode>> {
        self.user_mode.get().and_then(Weak::upgrade)
    }
}

impl Scheduler for HostScheduler {
    fn current_thread(&self) -> ThreadId {
        let id = CURRENT_THREAD.with(|current| match current.get() {
            Some(id) => id,
            None => {
                let id = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
                current.set(Some(id));
                id
            }
        });
        self.threads
            .lock()
            .entry(id)
            .or_insert_with(thread::current);
        id
    }

    fn current_process(&self) -> Option<ProcessId> {
        CURRENT_PID.with(Cell::get)
    }

    fn block(&self) {
        thread::park();
    }

    fn unblock(&self, id: ThreadId) {
        let thread = self.threads.lock().get(&id).cloned();
        match thread {
            Some(thread) => thread.unpark(),
            None => log::warn!("[HOST] unblock of unknown thread {}", id),
        }
    }

    fn spawn(&self, name: &str, pid: ProcessId, entry: ThreadEntry) -> KResult<ThreadId> {
        if self.fail_spawn.swap(false, Ordering::SeqCst) {
            return Err(Errno::ENOMEM);
        }

        let id = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
        let me = self.me.clone();
        self.live.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(format!("{}:{}", name, id))
            .spawn(move || {
                CURRENT_THREAD.with(|c| c.set(Some(id)));
                CURRENT_PID.with(|c| c.set(Some(pid)));
                if let Some(sched) = me.upgrade() {
                    sched.threads.lock().insert(id, thread::current());
                }

                let outcome = panic::catch_unwind(AssertUnwindSafe(entry));

                if let Some(sched) = me.upgrade() {
                    sched.threads.lock().remove(&id);
                    sched.live.fetch_sub(1, Ordering::SeqCst);
                }
                if let Err(payload) = outcome {
                    if !payload.is::<ThreadExit>() {
                        panic::resume_unwind(payload);
                    }
                }
            });

        match spawned {
            Ok(_) => Ok(id),
            Err(e) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                log::warn!("[HOST] thread spawn failed: {}", e);
                Err(Errno::ENOMEM)
            }
        }
    }

    fn enter_new_process(&self, start: ProgramStart) -> ! {
        match self.user_mode() {
            Some(mode) => mode.run_program(start),
            None => {
                log::error!("[HOST] no user mode attached");
                self.exit_thread()
            }
        }
    }

    fn enter_forked_process(&self, frame: TrapFrame) -> ! {
        match self.user_mode() {
            Some(mode) => mode.resume_forked(frame),
            None => {
                log::error!("[HOST] no user mode attached");
                self.exit_thread()
            }
        }
    }

    fn exit_thread(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }
}
