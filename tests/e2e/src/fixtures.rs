//! Reusable user programs.

use kproc::hosted::UserEnv;
use kproc::vm::WORD_SIZE;

use crate::harness::{Harness, Recorder};

/// What `/bin/true` saw at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupView {
    /// The argument strings.
    pub args: Vec<String>,
    /// Whether `argv`, the stack pointer and every `argv[i]` are word aligned.
    pub aligned: bool,
    /// Whether the stack pointer is `argv`.
    pub sp_is_argv: bool,
}

/// Inspect the startup state of the calling program.
pub fn startup_view(env: &UserEnv<'_>) -> StartupView {
    let pointers = env.argv_pointers().unwrap_or_default();
    let aligned = env.argv().is_aligned(WORD_SIZE)
        && env.stack_pointer().is_aligned(WORD_SIZE)
        && pointers.iter().all(|p| p.is_aligned(WORD_SIZE));
    StartupView {
        args: env.args().unwrap_or_default(),
        aligned,
        sp_is_argv: env.stack_pointer() == env.argv(),
    }
}

/// `/bin/true`: records its startup view and exits 0.
pub fn install_true(harness: &Harness) -> Recorder<StartupView> {
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/true", move |env| {
        rec.push(startup_view(env));
        0
    });
    seen
}

/// `/bin/echo`: writes its arguments after `argv[0]` to stdout.
pub fn install_echo(harness: &Harness) {
    harness.install("/bin/echo", |env| {
        let args = match env.args() {
            Ok(args) => args,
            Err(_) => return 1,
        };
        let line = format!("{}\n", args[1..].join(" "));
        match env.print(&line) {
            Ok(_) => 0,
            Err(_) => 1,
        }
    });
}

/// `/bin/exit`: exits with the code given as its first argument.
pub fn install_exit(harness: &Harness) {
    harness.install("/bin/exit", |env| {
        env.args()
            .ok()
            .and_then(|args| args.get(1).and_then(|a| a.parse().ok()))
            .unwrap_or(255)
    });
}
