//! chdir, getcwd and mkdir scenarios.

use kproc::Errno;
use kproc_e2e::{fixtures, Harness, Recorder};
use storage::OpenFlags;

#[test]
fn test_working_directory() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/cd", move |env| {
        rec.push(env.getcwd());
        rec.push(env.mkdir("/tmp", 0o755).map(|_| String::new()));
        rec.push(env.chdir("/tmp").map(|_| String::new()));
        rec.push(env.getcwd());
        rec.push(env.mkdir("sub", 0o755).map(|_| String::new()));
        rec.push(env.chdir("sub").map(|_| String::new()));
        rec.push(env.getcwd());
        rec.push(env.chdir("..").map(|_| String::new()));
        rec.push(env.getcwd());
        0
    });

    harness.run("/bin/cd", &[]).unwrap();
    let ok = |s: &str| -> Result<String, Errno> { Ok(String::from(s)) };
    assert_eq!(
        seen.snapshot(),
        vec![ok("/"), ok(""), ok(""), ok("/tmp"), ok(""), ok(""), ok("/tmp/sub"), ok(""), ok("/tmp")]
    );
}

#[test]
fn test_relative_paths_follow_cwd() {
    let harness = Harness::new();
    harness.host.fs.create_dir_all("/home/user").unwrap();
    fixtures::install_exit(&harness);
    harness.install("/bin/rel", |env| {
        if env.chdir("/home/user").is_err() {
            return 1;
        }
        let Ok(fd) = env.open("notes", OpenFlags::WRONLY | OpenFlags::CREAT, 0o644) else {
            return 2;
        };
        if env.write(fd, b"relative").is_err() {
            return 3;
        }
        let e = env.execv("../../bin/exit", &["exit", "9"]);
        100 + e.code()
    });

    assert_eq!(harness.run("/bin/rel", &[]).unwrap().code(), Some(9));
    assert_eq!(harness.host.fs.read_file("/home/user/notes").unwrap(), b"relative");
}

#[test]
fn test_directory_errors() {
    let harness = Harness::new();
    harness.host.fs.create_file("/plain", b"", 0o644).unwrap();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/bad", move |env| {
        rec.push(env.chdir("/missing"));
        rec.push(env.chdir("/plain"));
        rec.push(env.chdir("/bin//"));
        rec.push(env.mkdir("/plain", 0o755));
        rec.push(env.mkdir("/missing/child", 0o755));
        rec.push(env.mkdir("/bin", 0o755));
        0
    });

    harness.run("/bin/bad", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![
            Err(Errno::ENOENT),
            Err(Errno::ENOTDIR),
            Err(Errno::EINVAL),
            Err(Errno::EEXIST),
            Err(Errno::ENOENT),
            Err(Errno::EEXIST),
        ]
    );
}

#[test]
fn test_getcwd_buffer_checks() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/pwd", move |env| {
        let nr = kproc::syscall::SyscallNumber::Getcwd as u64;
        let _ = env.mkdir("/abc", 0o755);
        let _ = env.chdir("/abc");
        let buf = env.stack_pointer().addr() - 64;
        rec.push(env.raw_syscall(nr, [buf, 0, 0, 0, 0, 0]));
        rec.push(env.raw_syscall(nr, [buf, 2, 0, 0, 0, 0]));
        rec.push(env.raw_syscall(nr, [0, 16, 0, 0, 0, 0]));
        rec.push(env.raw_syscall(nr, [buf, 4, 0, 0, 0, 0]));
        0
    });

    harness.run("/bin/pwd", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![Err(Errno::EINVAL), Err(Errno::ERANGE), Err(Errno::EFAULT), Ok(4)]
    );
}

#[test]
fn test_forked_child_inherits_cwd() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/inherit", move |env| {
        let _ = env.mkdir("/work", 0o755);
        let _ = env.chdir("/work");
        let rec = rec.clone();
        let Ok(child) = env.fork(move |env| {
            rec.push(env.getcwd().unwrap_or_default());
            let _ = env.chdir("/");
            0
        }) else {
            return 1;
        };
        let _ = env.waitpid(child, kproc::process::WaitOptions::empty());
        match env.getcwd() {
            Ok(cwd) if cwd == "/work" => 0,
            _ => 2,
        }
    });

    assert_eq!(harness.run("/bin/inherit", &[]).unwrap().code(), Some(0));
    assert_eq!(seen.snapshot(), vec![String::from("/work")]);
}
