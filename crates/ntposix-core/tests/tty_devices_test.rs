use std::sync::Arc;

use ntposix_core::Errno;
use ntposix_core::device::DevicePath;
use ntposix_core::fhandler::Fhandler;
use ntposix_core::flags::{O_NONBLOCK, O_RDWR};
use ntposix_core::termios::{B19200, PARENB, PARODD, TCIFLUSH, TCOOFF, TCOON, TCSANOW};
use ntposix_core::testing::TestRig;
use ntposix_native::serial::Parity;

fn same_handler(a: &Arc<dyn Fhandler>, b: &Arc<dyn Fhandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[test]
fn serial_port_through_the_descriptor() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let port = Arc::clone(rig.kernel().serial(0).unwrap());
    let fd = ctx.open("/dev/ttyS0", O_RDWR, 0).unwrap();
    assert!(ctx.isatty(fd).unwrap());

    let mut tio = ctx.tcgetattr(fd).unwrap();
    tio.set_speed(B19200);
    tio.c_cflag |= PARENB | PARODD;
    ctx.tcsetattr(fd, TCSANOW, &tio).unwrap();
    let dcb = port.dcb();
    assert_eq!((dcb.baud_rate, dcb.parity), (19_200, Parity::Odd));
    assert_eq!(ctx.tcgetattr(fd).unwrap().speed(), B19200);

    port.inject(b"at\r");
    let mut buf = [0u8; 8];
    assert_eq!(ctx.read(fd, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"at\r");

    ctx.write(fd, b"ok\n").unwrap();
    ctx.tcdrain(fd).unwrap();
    assert_eq!(port.take_output(), b"ok\n");

    port.inject(b"stale");
    ctx.tcflush(fd, TCIFLUSH).unwrap();
    assert_eq!(port.queue_status().0, 0);

    ctx.tcflow(fd, TCOOFF).unwrap();
    ctx.tcflow(fd, TCOON).unwrap();
    ctx.tcsendbreak(fd, 0).unwrap();
    assert_eq!(port.breaks_sent(), 1);
}

#[test]
fn serial_ports_are_opened_once() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/ttyS0", O_RDWR, 0).unwrap();
    assert_eq!(ctx.open("/dev/ttyS0", O_RDWR, 0), Err(Errno::EACCES));
    assert_eq!(ctx.open("/dev/ttyS1", O_RDWR, 0), Err(Errno::ENOENT));
    // A duplicate shares the open rather than opening again.
    let dup = ctx.dup(fd).unwrap();
    ctx.close(fd).unwrap();
    ctx.close(dup).unwrap();
    ctx.open("/dev/ttyS0", O_RDWR, 0).unwrap();
}

#[test]
fn pty_slave_opens_alias_one_handle() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let master = ctx.open("/dev/ptmx", O_RDWR | O_NONBLOCK, 0).unwrap();
    let name = ctx.ptsname(master).unwrap();
    assert_eq!(name, "/dev/tty0");

    let a = ctx.open(&name, O_RDWR, 0).unwrap();
    let b = ctx.open(&name, O_RDWR, 0).unwrap();
    let first = ctx.table().get(a).unwrap();
    assert!(same_handler(&first, &ctx.table().get(b).unwrap()));
    assert_eq!(first.base().refs(), 2);

    ctx.write(master, b"hi\r").unwrap();
    let mut buf = [0u8; 16];
    let n = ctx.read(b, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hi\n");
    let n = ctx.read(master, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hi\r\n");

    ctx.write(a, b"bye\n").unwrap();
    let n = ctx.read(master, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"bye\r\n");
}

#[test]
fn pty_survives_fork_until_every_slave_closes() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let master = ctx.open("/dev/ptmx", O_RDWR | O_NONBLOCK, 0).unwrap();
    let slave = ctx.open("/dev/tty0", O_RDWR, 0).unwrap();
    let dev = DevicePath::PtySlave { index: 0 }.device_id();

    let child = ctx.fork().unwrap();
    assert!(child.env().archetype(dev).is_some());
    assert!(child.isatty(slave).unwrap());

    ctx.close(slave).unwrap();
    assert!(ctx.env().archetype(dev).is_none());
    let mut buf = [0u8; 8];
    // The child still holds a slave.
    assert_eq!(ctx.read(master, &mut buf), Err(Errno::EAGAIN));

    child.close(slave).unwrap();
    assert!(child.env().archetype(dev).is_none());
    assert_eq!(ctx.read(master, &mut buf).unwrap(), 0);
}

#[test]
fn pty_slave_needs_a_live_master() {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    assert_eq!(ctx.open("/dev/tty3", O_RDWR, 0), Err(Errno::ENOENT));
    let master = ctx.open("/dev/ptmx", O_RDWR, 0).unwrap();
    let slave = ctx.open("/dev/tty0", O_RDWR, 0).unwrap();
    ctx.close(master).unwrap();
    assert_eq!(ctx.write(slave, b"x"), Err(Errno::EIO));
    let mut buf = [0u8; 4];
    assert_eq!(ctx.read(slave, &mut buf).unwrap(), 0);
    assert_eq!(ctx.ptsname(slave).unwrap(), "/dev/tty0");
    // The index is free again once both sides are gone.
    ctx.close(slave).unwrap();
    let again = ctx.open("/dev/ptmx", O_RDWR, 0).unwrap();
    assert_eq!(ctx.ptsname(again).unwrap(), "/dev/tty0");
}
