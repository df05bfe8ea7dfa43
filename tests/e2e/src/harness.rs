//! Test harness for running user programs
//!
//! A [`Harness`] owns one booted kernel. [`Harness::run`] starts a program
//! the way the kernel starts its first process and waits, with a timeout,
//! for it to exit.

use std::fmt;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use kproc::hosted::{Booted, HostMachine, UserEnv};
use kproc::{Errno, ExitStatus, KernelConfig};
use spin::Mutex;

/// How long a program may run before the test gives up on it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a program did not produce an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessError {
    /// The kernel refused to start it.
    Spawn(Errno),
    /// It did not exit in time.
    Timeout,
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Spawn(e) => write!(f, "spawn failed: {}", e),
            HarnessError::Timeout => write!(f, "program timed out"),
        }
    }
}

/// Observations shared between a test and the programs it runs.
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Recorder(self.0.clone())
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Recorder(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Recorder<T> {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation.
    pub fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    /// Everything recorded so far.
    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().clone()
    }
}

/// One booted kernel.
pub struct Harness {
    /// The machine and everything on it.
    pub host: Booted,
}

impl Harness {
    /// Boot with the default configuration.
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Boot with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the kernel does not boot.
    pub fn with_config(config: KernelConfig) -> Self {
        match HostMachine::boot(config) {
            Ok(host) => Self { host },
            Err(e) => panic!("kernel failed to boot: {}", e),
        }
    }

    /// Install a program at `path`; returns its entry address, which is
    /// also the start of its read-only text page.
    ///
    /// # Panics
    ///
    /// Panics if the image cannot be written.
    pub fn install<F>(&self, path: &str, main: F) -> u64
    where
        F: Fn(&mut UserEnv<'_>) -> i32 + Send + Sync + 'static,
    {
        match self.host.install(path, main) {
            Ok(entry) => entry,
            Err(e) => panic!("cannot install {}: {}", path, e),
        }
    }

    /// Run `path` with `args` and wait for it to exit.
    pub fn run(&self, path: &str, args: &[&str]) -> Result<ExitStatus, HarnessError> {
        self.run_with_timeout(path, args, DEFAULT_TIMEOUT)
    }

    /// [`run`](Self::run) with an explicit timeout.
    pub fn run_with_timeout(
        &self,
        path: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExitStatus, HarnessError> {
        let process = self
            .host
            .kernel
            .spawn_program(path, args)
            .map_err(HarnessError::Spawn)?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(process.wait_for_exit());
        });
        rx.recv_timeout(timeout).map_err(|_| HarnessError::Timeout)
    }

    /// Wait until every kernel thread has finished.
    pub fn settle(&self) -> Result<(), HarnessError> {
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        while self.host.sched.live_threads() > 0 {
            if Instant::now() > deadline {
                return Err(HarnessError::Timeout);
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    /// Console output so far, as text.
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.host.console.output()).into_owned()
    }

    /// Number of live processes, init included.
    pub fn process_count(&self) -> usize {
        self.host.kernel.processes().count()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
