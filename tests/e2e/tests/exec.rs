//! execv scenarios: argument passing and failure without side effects.

use kproc::{Errno, KernelConfig};
use kproc_e2e::fixtures::{self, StartupView};
use kproc_e2e::{Harness, Recorder};
use storage::OpenFlags;

fn view(args: &[&str]) -> StartupView {
    StartupView {
        args: args.iter().map(|a| a.to_string()).collect(),
        aligned: true,
        sp_is_argv: true,
    }
}

#[test]
fn test_exec_passes_arguments() {
    let harness = Harness::new();
    let seen = fixtures::install_true(&harness);
    harness.install("/bin/launcher", |env| {
        let e = env.execv("/bin/true", &["true", "one", "two"]);
        100 + e.code()
    });

    let status = harness.run("/bin/launcher", &[]).unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(seen.snapshot(), vec![view(&["true", "one", "two"])]);
}

#[test]
fn test_exec_with_empty_argv_uses_path() {
    let harness = Harness::new();
    let seen = fixtures::install_true(&harness);
    harness.install("/bin/launcher", |env| {
        let e = env.execv("/bin/true", &[]);
        100 + e.code()
    });

    assert_eq!(harness.run("/bin/launcher", &[]).unwrap().code(), Some(0));
    assert_eq!(seen.snapshot(), vec![view(&["/bin/true"])]);
}

#[test]
fn test_first_program_gets_arguments() {
    let harness = Harness::new();
    let seen = fixtures::install_true(&harness);

    harness.run("/bin/true", &["true", "", "last"]).unwrap();
    assert_eq!(seen.snapshot(), vec![view(&["true", "", "last"])]);
}

#[test]
fn test_failed_exec_keeps_process_intact() {
    let harness = Harness::new();
    harness.host.fs.create_file("/script", b"#!/bin/sh\n", 0o755).unwrap();
    harness.host.fs.create_file("/data", b"keep", 0o644).unwrap();
    harness.host.fs.create_dir_all("/dir").unwrap();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/try", move |env| {
        let Ok(fd) = env.open("/data", OpenFlags::RDONLY, 0) else {
            return 1;
        };
        rec.push(env.execv("/nope", &["nope"]));
        rec.push(env.execv("/dir", &["dir"]));
        rec.push(env.execv("/script", &["script"]));
        rec.push(env.execv("/data", &["data"]));

        // Same image, same descriptors, same arguments.
        let mut buf = [0u8; 4];
        match (env.read(fd, &mut buf), env.args()) {
            (Ok(4), Ok(args)) if &buf == b"keep" && args == ["try", "x"] => 7,
            _ => 2,
        }
    });

    let status = harness.run("/bin/try", &["try", "x"]).unwrap();
    assert_eq!(status.code(), Some(7));
    assert_eq!(
        seen.snapshot(),
        vec![Errno::ENOENT, Errno::EACCES, Errno::ENOEXEC, Errno::EACCES]
    );
}

#[test]
fn test_exec_argument_budget() {
    let harness = Harness::with_config(KernelConfig::default().with_arg_max(256));
    let seen = fixtures::install_true(&harness);
    let errors = Recorder::new();
    let rec = errors.clone();
    harness.install("/bin/big", move |env| {
        let long = "x".repeat(300);
        rec.push(env.execv("/bin/true", &["true", long.as_str()]));
        // Still fits.
        let e = env.execv("/bin/true", &["true", "short"]);
        100 + e.code()
    });

    assert_eq!(harness.run("/bin/big", &[]).unwrap().code(), Some(0));
    assert_eq!(errors.snapshot(), vec![Errno::E2BIG]);
    assert_eq!(seen.snapshot(), vec![view(&["true", "short"])]);
}

#[test]
fn test_exec_bad_pointers() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/badexec", move |env| {
        let nr = kproc::syscall::SyscallNumber::Execv as u64;
        rec.push(env.raw_syscall(nr, [0, 0, 0, 0, 0, 0]).map(|_| ()));
        let argv = env.argv().addr();
        rec.push(env.raw_syscall(nr, [0x10, argv, 0, 0, 0, 0]).map(|_| ()));
        let path = match env.argv_pointers() {
            Ok(pointers) => pointers[0].addr(),
            Err(_) => return 1,
        };
        rec.push(env.raw_syscall(nr, [path, 0, 0, 0, 0, 0]).map(|_| ()));
        rec.push(env.raw_syscall(nr, [path, argv + 1, 0, 0, 0, 0]).map(|_| ()));
        0
    });

    assert_eq!(harness.run("/bin/badexec", &["/bin/badexec"]).unwrap().code(), Some(0));
    assert_eq!(
        seen.snapshot(),
        vec![
            Err(Errno::EFAULT),
            Err(Errno::EFAULT),
            Err(Errno::EFAULT),
            Err(Errno::EFAULT),
        ]
    );
}

#[test]
fn test_exec_out_of_memory_is_recoverable() {
    let harness = Harness::new();
    let seen = fixtures::install_true(&harness);
    let machine = harness.host.machine.clone();
    let errors = Recorder::new();
    let rec = errors.clone();
    harness.install("/bin/squeeze", move |env| {
        machine.faults().fail_next_space_create();
        rec.push(env.execv("/bin/true", &["true"]));
        let e = env.execv("/bin/true", &["true", "again"]);
        100 + e.code()
    });

    assert_eq!(harness.run("/bin/squeeze", &[]).unwrap().code(), Some(0));
    assert_eq!(errors.snapshot(), vec![Errno::ENOMEM]);
    assert_eq!(seen.snapshot(), vec![view(&["true", "again"])]);
}

#[test]
fn test_exec_keeps_descriptors() {
    let harness = Harness::new();
    harness.install("/bin/writer", |env| match env.write(3, b"from the new image") {
        Ok(_) => 0,
        Err(e) => e.code(),
    });
    harness.install("/bin/setup", |env| {
        match env.open("/out", OpenFlags::WRONLY | OpenFlags::CREAT, 0o644) {
            Ok(3) => {}
            _ => return 1,
        }
        let e = env.execv("/bin/writer", &["writer"]);
        100 + e.code()
    });

    assert_eq!(harness.run("/bin/setup", &[]).unwrap().code(), Some(0));
    assert_eq!(harness.host.fs.read_file("/out").unwrap(), b"from the new image");
}

#[test]
fn test_forked_child_execs() {
    let harness = Harness::new();
    fixtures::install_exit(&harness);
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/shell", move |env| {
        let child = env.fork(|env| {
            let e = env.execv("/bin/exit", &["exit", "17"]);
            100 + e.code()
        });
        let Ok(child) = child else {
            return 1;
        };
        if let Ok(Some((_, status))) = env.waitpid(child, kproc::process::WaitOptions::empty()) {
            rec.push(status.code());
        }
        0
    });

    harness.run("/bin/shell", &[]).unwrap();
    assert_eq!(seen.snapshot(), vec![Some(17)]);
}

#[test]
fn test_spawn_missing_program() {
    let harness = Harness::new();
    assert_eq!(
        harness.run("/bin/absent", &[]),
        Err(kproc_e2e::HarnessError::Spawn(Errno::ENOENT))
    );
    harness.settle().unwrap();
    assert_eq!(harness.process_count(), 1);
}
