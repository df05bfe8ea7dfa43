//! Descriptor table scenarios driven through the syscall interface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kproc::hosted::USER_STACK_TOP;
use kproc::syscall::SyscallNumber;
use kproc::{Errno, KernelConfig};
use kproc_e2e::{Harness, Recorder};
use storage::OpenFlags;

fn create() -> OpenFlags {
    OpenFlags::RDWR | OpenFlags::CREAT
}

#[test]
fn test_open_hands_out_distinct_descriptors_until_full() {
    let harness = Harness::with_config(KernelConfig::default().with_max_open_files(4));
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/fill", move |env| {
        for i in 0..5 {
            rec.push(env.open(&format!("/f{}", i), create(), 0o644));
        }
        // A freed slot is reused.
        let _ = env.close(4);
        rec.push(env.open("/again", create(), 0o644));
        0
    });

    let status = harness.run("/bin/fill", &[]).unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(
        seen.snapshot(),
        vec![Ok(3), Ok(4), Ok(5), Ok(6), Err(Errno::EMFILE), Ok(4)]
    );
}

#[test]
fn test_close_is_exactly_once() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/close", move |env| {
        let fd = match env.open("/file", create(), 0o644) {
            Ok(fd) => fd,
            Err(_) => return 1,
        };
        rec.push(env.close(fd));
        rec.push(env.close(fd));
        rec.push(env.close(-1));
        rec.push(env.close(1000));
        0
    });

    harness.run("/bin/close", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![Ok(()), Err(Errno::EBADF), Err(Errno::EBADF), Err(Errno::EBADF)]
    );
}

#[test]
fn test_shared_file_released_on_last_close() {
    let harness = Harness::new();
    harness.host.fs.create_file("/data", b"shared", 0o644).unwrap();
    let fs = harness.host.fs.clone();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/share", move |env| {
        let before = fs.open_handles();
        let Ok(fd) = env.open("/data", OpenFlags::RDONLY, 0) else {
            return 1;
        };
        let _ = env.dup2(fd, 10);
        let _ = env.dup2(fd, 11);
        rec.push(fs.open_handles() - before);

        let _ = env.close(fd);
        let _ = env.close(10);
        let mut buf = [0u8; 6];
        rec.push(env.read(11, &mut buf).unwrap_or(0));
        rec.push(fs.open_handles() - before);

        let _ = env.close(11);
        rec.push(fs.open_handles() - before);
        rec.push(match env.read(11, &mut buf) {
            Err(Errno::EBADF) => 99,
            _ => 0,
        });
        0
    });

    harness.run("/bin/share", &[]).unwrap();
    assert_eq!(seen.snapshot(), vec![1, 6, 1, 0, 99]);
}

#[test]
fn test_dup2_semantics() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/dup", move |env| {
        let Ok(fd) = env.open("/dup", create(), 0o644) else {
            return 1;
        };
        rec.push(env.dup2(fd, fd));
        rec.push(env.dup2(fd, -1));
        rec.push(env.dup2(50, 5));

        // Replacing an open target closes it first.
        let _ = env.write(fd, b"abc");
        let Ok(other) = env.open("/other", create(), 0o644) else {
            return 1;
        };
        rec.push(env.dup2(fd, other));
        let _ = env.write(other, b"def");
        let _ = env.lseek(fd, 0, 0);
        let mut buf = [0u8; 8];
        let n = env.read(fd, &mut buf).unwrap_or(0);
        rec.push(Ok(n as i32));
        0
    });

    harness.run("/bin/dup", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![Ok(3), Err(Errno::EBADF), Err(Errno::EBADF), Ok(4), Ok(6)]
    );
    assert_eq!(harness.host.fs.read_file("/dup").unwrap(), b"abcdef");
    assert!(harness.host.fs.read_file("/other").unwrap().is_empty());
}

#[test]
fn test_write_seek_read_round_trip() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/rw", move |env| {
        let Ok(fd) = env.open("/notes", create(), 0o644) else {
            return 1;
        };
        let written = env.write(fd, b"hello, world").unwrap_or(0);
        let end = env.lseek(fd, 0, 1).unwrap_or(0);
        let _ = env.lseek(fd, 7, 0);
        let mut buf = [0u8; 16];
        let n = env.read(fd, &mut buf).unwrap_or(0);
        rec.push((written, end, String::from_utf8_lossy(&buf[..n]).into_owned()));
        0
    });

    harness.run("/bin/rw", &[]).unwrap();
    assert_eq!(seen.snapshot(), vec![(12, 12, String::from("world"))]);
}

#[test]
fn test_access_mode_and_seek_errors() {
    let harness = Harness::new();
    harness.host.fs.create_file("/ro", b"data", 0o644).unwrap();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/modes", move |env| {
        let Ok(fd) = env.open("/ro", OpenFlags::RDONLY, 0) else {
            return 1;
        };
        rec.push(env.write(fd, b"x").map(|_| ()));
        rec.push(env.lseek(fd, -1, 0).map(|_| ()));
        rec.push(env.lseek(fd, 0, 7).map(|_| ()));
        rec.push(env.lseek(1, 0, 0).map(|_| ()));
        rec.push(env.open("/missing", OpenFlags::RDONLY, 0).map(|_| ()));
        0
    });

    harness.run("/bin/modes", &[]).unwrap();
    assert_eq!(
        seen.snapshot(),
        vec![
            Err(Errno::EBADF),
            Err(Errno::EINVAL),
            Err(Errno::EINVAL),
            Err(Errno::ESPIPE),
            Err(Errno::ENOENT),
        ]
    );
}

#[test]
fn test_console_output() {
    let harness = Harness::new();
    kproc_e2e::fixtures::install_echo(&harness);

    let status = harness.run("/bin/echo", &["echo", "hello", "there"]).unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(harness.stdout(), "hello there\n");
}

#[test]
fn test_descriptors_released_at_exit() {
    let harness = Harness::new();
    let before = harness.host.fs.open_handles();
    harness.install("/bin/leak", |env| {
        for i in 0..8 {
            let _ = env.open(&format!("/leak{}", i), create(), 0o644);
        }
        0
    });

    harness.run("/bin/leak", &[]).unwrap();
    harness.settle().unwrap();
    assert_eq!(harness.host.fs.open_handles(), before);
}

#[test]
fn test_faulting_read_leaves_offset_alone() {
    let harness = Harness::new();
    harness.host.fs.create_file("/letters", b"abcdef", 0o644).unwrap();
    let text = Arc::new(AtomicU64::new(0));
    let text_page = text.clone();
    let seen = Recorder::new();
    let contents = Recorder::new();
    let (rec, got) = (seen.clone(), contents.clone());
    let entry = harness.install("/bin/badread", move |env| {
        let Ok(fd) = env.open("/letters", OpenFlags::RDONLY, 0) else {
            return 1;
        };
        let nr = SyscallNumber::Read as u64;
        let fd = fd as u64;
        // Unmapped, read-only, and running off the top of the stack.
        rec.push(env.raw_syscall(nr, [fd, 0x10, 3, 0, 0, 0]));
        rec.push(env.raw_syscall(nr, [fd, text_page.load(Ordering::SeqCst), 3, 0, 0, 0]));
        rec.push(env.raw_syscall(nr, [fd, USER_STACK_TOP - 2, 3, 0, 0, 0]));
        rec.push(env.lseek(fd as i32, 0, 1));

        let mut buf = [0u8; 3];
        let n = env.read(fd as i32, &mut buf).unwrap_or(0);
        got.push(String::from_utf8_lossy(&buf[..n]).into_owned());
        0
    });
    text.store(entry, Ordering::SeqCst);

    assert_eq!(harness.run("/bin/badread", &[]).unwrap().code(), Some(0));
    assert_eq!(
        seen.snapshot(),
        vec![Err(Errno::EFAULT), Err(Errno::EFAULT), Err(Errno::EFAULT), Ok(0)]
    );
    assert_eq!(contents.snapshot(), vec![String::from("abc")]);
}

#[test]
fn test_read_on_write_only_descriptor() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/wronly", move |env| {
        let Ok(fd) = env.open("/sink", OpenFlags::WRONLY | OpenFlags::CREAT, 0o644) else {
            return 1;
        };
        let mut buf = [0u8; 4];
        rec.push(env.read(fd, &mut buf));
        0
    });

    harness.run("/bin/wronly", &[]).unwrap();
    assert_eq!(seen.snapshot(), vec![Err(Errno::EBADF)]);
}

#[test]
fn test_write_far_past_end_fails_cleanly() {
    let harness = Harness::new();
    let seen = Recorder::new();
    let rec = seen.clone();
    harness.install("/bin/sparse", move |env| {
        let Ok(fd) = env.open("/sparse", create(), 0o644) else {
            return 1;
        };
        rec.push(env.lseek(fd, i64::MAX, 0));
        rec.push(env.write(fd, b"x").map(|n| n as u64));
        rec.push(env.lseek(fd, 0, 1));
        let _ = env.lseek(fd, 0, 0);
        rec.push(env.write(fd, b"ok").map(|n| n as u64));
        0
    });

    let status = harness
        .run_with_timeout("/bin/sparse", &[], std::time::Duration::from_secs(5))
        .unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(
        seen.snapshot(),
        vec![
            Ok(i64::MAX as u64),
            Err(Errno::EFBIG),
            Ok(i64::MAX as u64),
            Ok(2),
        ]
    );
    assert_eq!(harness.host.fs.read_file("/sparse").unwrap(), b"ok");
}
