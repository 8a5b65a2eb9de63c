use std::sync::Arc;
use std::thread;

use ntposix_core::Errno;
use ntposix_core::device::DevicePath;
use ntposix_core::fhandler::Fhandler;
use ntposix_core::flags::O_RDWR;
use ntposix_core::signal::{Disposition, MaskHow, SIGINT, SIGQUIT};
use ntposix_core::termios::{TCSAFLUSH, TCSANOW};
use ntposix_core::testing::TestRig;

#[test]
fn line_editing_through_the_descriptor() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    let console = rig.kernel().console();
    // "junk" is killed, the trailing 'x' erased.
    console.push_input(b"junk\x15ok\x7fk!x\x7f\n\x04");
    let mut buf = [0u8; 32];
    let n = ctx.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"ok!\n");
    assert_eq!(ctx.read(fd, &mut buf).unwrap(), 0);
}

#[test]
fn aliases_share_terminal_attributes() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let a = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    let b = ctx.dup(a).unwrap();
    let mut tio = ctx.tcgetattr(a).unwrap();
    tio.make_raw();
    ctx.tcsetattr(b, TCSANOW, &tio).unwrap();
    assert!(!ctx.tcgetattr(a).unwrap().canonical());

    rig.kernel().console().push_input(b"q");
    let mut buf = [0u8; 4];
    assert_eq!(ctx.read(a, &mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'q');
}

#[test]
fn tcsaflush_discards_pending_input() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/console", O_RDWR, 0).unwrap();
    rig.kernel().console().push_input(b"stale\n");
    let tio = ctx.tcgetattr(fd).unwrap();
    ctx.tcsetattr(fd, TCSAFLUSH, &tio).unwrap();
    ctx.fcntl(fd, ntposix_core::flags::F_SETFL, i64::from(ntposix_core::flags::O_NONBLOCK))
        .unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(ctx.read(fd, &mut buf), Err(Errno::EAGAIN));
}

#[test]
fn signal_characters_interrupt_reads() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    ctx.set_disposition(SIGINT, Disposition::Catch).unwrap();
    rig.kernel().console().push_input(b"abc\x03");
    let mut buf = [0u8; 8];
    assert_eq!(ctx.read(fd, &mut buf), Err(Errno::EINTR));
    assert_eq!(ctx.deliver_pending(), vec![SIGINT]);

    // Blocked signals stay pending and do not interrupt.
    ctx.sigprocmask(MaskHow::Block, 1 << (SIGQUIT - 1));
    rig.kernel().console().push_input(b"\x1cline\n");
    let n = ctx.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"line\n");
    assert!(ctx.env().signals.is_pending(SIGQUIT));
    assert!(ctx.deliver_pending().is_empty());
}

#[test]
fn writes_render_on_the_screen() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    ctx.write(fd, b"one\ntwo\x1b[1;1HO").unwrap();
    let console = rig.kernel().console();
    assert_eq!(console.line_text(0), "One");
    assert_eq!(console.line_text(1), "two");
}

fn same_handler(a: &Arc<dyn Fhandler>, b: &Arc<dyn Fhandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[test]
fn racing_first_opens_share_one_console() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fds: Vec<i32> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| ctx.open("/dev/tty", O_RDWR, 0).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    let first = ctx.table().get(fds[0]).unwrap();
    for fd in &fds {
        assert!(same_handler(&ctx.table().get(*fd).unwrap(), &first));
    }
    assert_eq!(first.base().refs(), 8);
}

#[test]
fn closed_console_is_not_revived() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let dev = DevicePath::Console.device_id();
    let a = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    let b = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    let held = ctx.table().get(a).unwrap();
    assert_eq!(held.base().refs(), 2);

    ctx.close(a).unwrap();
    assert!(ctx.env().archetype(dev).is_some());
    ctx.close(b).unwrap();
    // `held` keeps the allocation alive but its last descriptor is gone.
    assert_eq!(held.base().refs(), 0);
    assert!(ctx.env().archetype(dev).is_none());

    let c = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
    let fresh = ctx.table().get(c).unwrap();
    assert!(!same_handler(&fresh, &held));
    assert_eq!(fresh.base().refs(), 1);
}
