use ntposix_core::Errno;
use ntposix_core::config::RuntimeConfig;
use ntposix_core::flags::{F_DUPFD_CLOEXEC, F_GETFD, FD_CLOEXEC, O_CLOEXEC, O_RDONLY, O_RDWR};
use ntposix_core::signal::SIGPIPE;
use ntposix_core::testing::TestRig;

#[test]
fn close_of_unused_handle_releases_native_resources() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let process = &ctx.env().process;
    let before = process.handle_count();
    let [r, w] = ctx.pipe(0).unwrap();
    assert!(process.handle_count() > before);
    ctx.close(r).unwrap();
    ctx.close(w).unwrap();
    assert_eq!(process.handle_count(), before);

    let fd = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    ctx.close(fd).unwrap();
    assert_eq!(process.handle_count(), before);
}

#[test]
fn dup2_onto_an_open_descriptor_closes_it_first() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let [r, w] = ctx.pipe(0).unwrap();
    let null = ctx.open("/dev/null", O_RDWR, 0).unwrap();
    assert_eq!(ctx.dup2(null, r).unwrap(), r);
    // The only read end is gone.
    assert_eq!(ctx.write(w, b"x"), Err(Errno::EPIPE));
    assert!(ctx.env().signals.is_pending(SIGPIPE));
    // `r` now reads the null device.
    let mut buf = [0u8; 4];
    assert_eq!(ctx.read(r, &mut buf).unwrap(), 0);
    assert_eq!(ctx.fcntl(r, F_GETFD, 0).unwrap(), 0);
}

#[test]
fn dup2_edge_cases() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/null", O_RDONLY, 0).unwrap();
    assert_eq!(ctx.dup2(fd, fd).unwrap(), fd);
    assert_eq!(ctx.dup2(9, 9), Err(Errno::EBADF));
    assert_eq!(ctx.dup2(fd, -1), Err(Errno::EBADF));
    assert_eq!(ctx.dup2(fd, 1 << 20), Err(Errno::EBADF));
    assert_eq!(ctx.dup(42), Err(Errno::EBADF));
}

#[test]
fn open_max_bounds_the_table() {
    let config = RuntimeConfig {
        open_max: 4,
        ..RuntimeConfig::default()
    };
    let rig = TestRig::new().config(config).build();
    let ctx = rig.context();
    for expected in 0..4 {
        assert_eq!(ctx.open("/dev/null", O_RDONLY, 0).unwrap(), expected);
    }
    assert_eq!(ctx.open("/dev/null", O_RDONLY, 0), Err(Errno::EMFILE));
    assert_eq!(ctx.dup(0), Err(Errno::EMFILE));
    assert_eq!(ctx.pipe(0), Err(Errno::EMFILE));
    ctx.close(2).unwrap();
    assert_eq!(ctx.dup(0).unwrap(), 2);
}

#[test]
fn exec_drops_close_on_exec_descriptors_only() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let kept = ctx.open("/proc/self/exename", O_RDONLY, 0).unwrap();
    let dropped = ctx.open("/dev/null", O_RDONLY | O_CLOEXEC, 0).unwrap();
    let also_dropped = ctx.fcntl(kept, F_DUPFD_CLOEXEC, 5).unwrap();
    assert_eq!(ctx.fcntl(5, F_GETFD, 0).unwrap(), i64::from(FD_CLOEXEC));
    assert_eq!(also_dropped, 5);

    let mut buf = [0u8; 64];
    let n = ctx.read(kept, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"/usr/bin/sh");

    ctx.exec("/usr/bin/true", &["true".to_owned()]);
    assert!(ctx.table().is_open(kept));
    assert!(!ctx.table().is_open(dropped));
    assert!(!ctx.table().is_open(5));

    // The survivor's buffer was reset and refills from the new image.
    ctx.lseek(kept, 0, 0).unwrap();
    let n = ctx.read(kept, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"/usr/bin/true");
}

#[test]
fn bad_descriptors_are_ebadf_everywhere() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let mut buf = [0u8; 1];
    assert_eq!(ctx.read(3, &mut buf), Err(Errno::EBADF));
    assert_eq!(ctx.write(-1, &buf), Err(Errno::EBADF));
    assert_eq!(ctx.close(3), Err(Errno::EBADF));
    assert_eq!(ctx.fstat(3).err(), Some(Errno::EBADF));
    assert_eq!(ctx.fcntl(3, F_GETFD, 0), Err(Errno::EBADF));
}
