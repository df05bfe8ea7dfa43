//! fork, _exit and waitpid scenarios.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use kproc::process::status::SIGSEGV;
use kproc::process::WaitOptions;
use kproc::{Errno, ExitStatus, ProcessId};
use kproc_e2e::{Harness, Recorder};
use storage::OpenFlags;

#[test]
fn test_fork_exit_wait() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/parent", move |env| {
        let child = match env.fork(|env| env.exit(42)) {
            Ok(pid) => pid,
            Err(_) => return 1,
        };
        rec.push(env.waitpid(child, WaitOptions::empty()));
        rec.push(env.waitpid(child, WaitOptions::empty()));
        0
    });

    assert_eq!(harness.run("/bin/parent", &[]).unwrap().code(), Some(0));
    let seen = seen.snapshot();
    let (pid, status) = seen[0].unwrap().unwrap();
    assert!(pid.as_raw() > 1);
    assert_eq!(status.code(), Some(42));
    assert_eq!(seen[1], Err(Errno::ESRCH));
}

#[test]
fn test_child_sees_its_own_pid() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let (parent_rec, child_rec) = (seen.clone(), seen.clone());
    harness.install("/bin/pids", move |env| {
        let rec = child_rec.clone();
        let Ok(child) = env.fork(move |env| {
            rec.push(env.getpid().map(|p| p.as_raw()).unwrap_or(-1));
            0
        }) else {
            return 1;
        };
        let _ = env.waitpid(child, WaitOptions::empty());
        parent_rec.push(child.as_raw());
        parent_rec.push(env.getpid().map(|p| p.as_raw()).unwrap_or(-1));
        0
    });

    harness.run("/bin/pids", &[]).unwrap();
    let seen = seen.snapshot();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], seen[1]);
    assert_ne!(seen[1], seen[2]);
}

#[test]
fn test_wait_on_non_child() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/siblings", move |env| {
        let Ok(first) = env.fork(|_| 3) else {
            return 1;
        };
        let rec = rec.clone();
        let Ok(second) = env.fork(move |env| {
            rec.push(env.waitpid(first, WaitOptions::empty()).map(|_| ()));
            rec.push(env.waitpid(ProcessId::INIT, WaitOptions::empty()).map(|_| ()));
            0
        }) else {
            return 1;
        };
        let _ = env.waitpid(second, WaitOptions::empty());
        let _ = env.waitpid(first, WaitOptions::empty());
        0
    });

    harness.run("/bin/siblings", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![Err(Errno::ECHILD), Err(Errno::ECHILD)]
    );
}

#[test]
fn test_waitpid_argument_errors() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/badwait", move |env| {
        let Ok(child) = env.fork(|_| 0) else {
            return 1;
        };
        let pid = child.as_raw();
        let sp = env.stack_pointer().addr();
        rec.push(env.waitpid_raw(0, 0, 0).map(|_| ()));
        rec.push(env.waitpid_raw(-1, 0, 0).map(|_| ()));
        rec.push(env.waitpid_raw(9999, 0, 0).map(|_| ()));
        rec.push(env.waitpid_raw(pid, 0, 0x80).map(|_| ()));
        rec.push(env.waitpid_raw(pid, sp - 6, 0).map(|_| ()));
        rec.push(env.waitpid_raw(pid, 0x10, 0).map(|_| ()));
        // NULL discards the status.
        rec.push(env.waitpid_raw(pid, 0, 0).map(|_| ()));
        0
    });

    harness.run("/bin/badwait", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![
            Err(Errno::EINVAL),
            Err(Errno::EINVAL),
            Err(Errno::ESRCH),
            Err(Errno::EINVAL),
            Err(Errno::EFAULT),
            Err(Errno::EFAULT),
            Ok(()),
        ]
    );
}

#[test]
fn test_concurrent_forks() {
    const CHILDREN: usize = 8;

    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/many", move |env| {
        let Ok(fd) = env.open("/log", OpenFlags::WRONLY | OpenFlags::CREAT, 0o644) else {
            return 1;
        };
        let mut children = Vec::new();
        for i in 0..CHILDREN {
            let child = env.fork(move |env| {
                // Closing the inherited copy must not affect the parent.
                let _ = env.close(fd);
                i as i32
            });
            match child {
                Ok(pid) => children.push((pid, i as i32)),
                Err(_) => return 1,
            }
        }
        for (pid, expected) in children {
            match env.waitpid(pid, WaitOptions::empty()) {
                Ok(Some((reaped, status))) if reaped == pid => {
                    rec.push((pid, status.code() == Some(expected)))
                }
                _ => return 2,
            }
        }
        match env.write(fd, b"still open") {
            Ok(10) => 0,
            _ => 3,
        }
    });

    assert_eq!(harness.run("/bin/many", &[]).unwrap().code(), Some(0));
    let seen = seen.snapshot();
    assert_eq!(seen.len(), CHILDREN);
    assert!(seen.iter().all(|(_, ok)| *ok));
    let mut pids: Vec<_> = seen.iter().map(|(pid, _)| *pid).collect();
    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), CHILDREN);
    assert_eq!(harness.host.fs.read_file("/log").unwrap(), b"still open");

    harness.settle().unwrap();
    assert_eq!(harness.process_count(), 1);
}

#[test]
fn test_wnohang() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/poll", move |env| {
        let (go, wait) = mpsc::channel::<()>();
        let Ok(child) = env.fork(move |_| {
            let _ = wait.recv();
            5
        }) else {
            return 1;
        };
        rec.push(env.waitpid(child, WaitOptions::NOHANG));
        let _ = go.send(());
        rec.push(env.waitpid(child, WaitOptions::empty()));
        0
    });

    harness.run("/bin/poll", &[]).unwrap();
    let seen = seen.snapshot();
    assert_eq!(seen[0], Ok(None));
    let (_, status) = seen[1].unwrap().unwrap();
    assert_eq!(status, ExitStatus::exited(5));
}

#[test]
fn test_orphans_are_reaped_by_init() {
    let harness = Harness::new();
    let (release, gate) = mpsc::channel::<()>();
    let gate = std::sync::Mutex::new(Some(gate));
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/orphan", move |env| {
        let Some(gate) = gate.lock().ok().and_then(|mut g| g.take()) else {
            return 1;
        };
        let Ok(child) = env.fork(move |_| {
            let _ = gate.recv();
            0
        }) else {
            return 1;
        };
        rec.push(child);
        0
    });

    assert_eq!(harness.run("/bin/orphan", &[]).unwrap().code(), Some(0));
    let orphan = seen.snapshot()[0];
    let process = harness.host.kernel.process(orphan).unwrap();
    assert_eq!(process.parent(), Some(ProcessId::INIT));

    release.send(()).unwrap();
    harness.settle().unwrap();
    assert!(harness.host.kernel.process(orphan).is_none());
    assert_eq!(harness.process_count(), 1);
}

#[test]
fn test_exited_children_reaped_with_parent() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/careless", move |env| {
        let Ok(child) = env.fork(|_| 0) else {
            return 1;
        };
        rec.push(child);
        // Never waits.
        0
    });

    harness.run("/bin/careless", &[]).unwrap();
    harness.settle().unwrap();
    let child = seen.snapshot()[0];
    assert!(harness.host.kernel.process(child).is_none());
    assert_eq!(harness.process_count(), 1);
}

#[test]
fn test_fatal_fault_reports_signal() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/segv", move |env| {
        let Ok(child) = env.fork(|env| env.crash()) else {
            return 1;
        };
        if let Ok(Some((_, status))) = env.waitpid(child, WaitOptions::empty()) {
            rec.push(status);
        }
        0
    });

    harness.run("/bin/segv", &[]).unwrap();
    let status = seen.snapshot()[0];
    assert_eq!(status.signal(), Some(SIGSEGV));
    assert_eq!(status.code(), None);
}

#[test]
fn test_exit_code_truncated_to_eight_bits() {
    let harness = Harness::new();
    harness.install("/bin/big", |env| env.exit(0x1ff));

    let status = harness.run("/bin/big", &[]).unwrap();
    assert_eq!(status.code(), Some(0xff));
}

#[test]
fn test_fork_failure_leaves_no_trace() {
    let harness = Harness::new();
    let sched = harness.host.sched.clone();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/nofork", move |env| {
        sched.fail_next_spawn();
        rec.push(env.fork(|_| 0).map(|_| ()));
        0
    });

    harness.run("/bin/nofork", &[]).unwrap();
    harness.settle().unwrap();
    assert_eq!(seen.snapshot(), vec![Err(Errno::ENOMEM)]);
    assert_eq!(harness.process_count(), 1);
}

#[test]
fn test_read_only_status_pointer_keeps_child() {
    let harness = Harness::new();
    let text = Arc::new(AtomicU64::new(0));
    let text_page = text.clone();
    let seen = Recorder::new();
    let rec = seen.clone();
    let entry = harness.install("/bin/rowait", move |env| {
        let Ok(child) = env.fork(|env| env.exit(7)) else {
            return 1;
        };
        let status = text_page.load(Ordering::SeqCst);
        rec.push(env.waitpid_raw(child.as_raw(), status, 0).map(|_| None));
        rec.push(
            env.waitpid(child, WaitOptions::empty())
                .map(|reaped| reaped.map(|(_, status)| status)),
        );
        0
    });
    text.store(entry, Ordering::SeqCst);

    assert_eq!(harness.run("/bin/rowait", &[]).unwrap().code(), Some(0));
    assert_eq!(
        seen.snapshot(),
        vec![Err(Errno::EFAULT), Ok(Some(ExitStatus::exited(7)))]
    );
}
