use std::ffi::{CString, c_int};

use ntposix_abi::errno_abi::ntp_errno;
use ntposix_abi::io_abi::*;
use ntposix_abi::poll_abi::ntp_poll;
use ntposix_abi::signal_abi::{SIG_BLOCK, SIG_SETMASK, ntp_sigprocmask};
use ntposix_abi::socket_abi::{ntp_shutdown, ntp_socketpair};
use ntposix_abi::termios_abi::{
    ntp_ptsname_r, ntp_tcdrain, ntp_tcflow, ntp_tcflush, ntp_tcgetattr, ntp_tcsendbreak,
    ntp_tcsetattr,
};
use ntposix_abi::unistd_abi::*;
use ntposix_core::flags::{F_GETFD, F_SETFD, FD_CLOEXEC, O_RDONLY, O_RDWR, S_IFCHR, Stat};
use ntposix_core::poll::{POLLIN, PollFd};
use ntposix_core::termios::{TCIOFLUSH, TCOOFF, TCOON, TCSANOW, Termios};

const EBADF: c_int = 9;
const EFAULT: c_int = 14;
const ENOENT: c_int = 2;
const ENOTTY: c_int = 25;
const ERANGE: c_int = 34;

fn path(s: &str) -> CString {
    CString::new(s).unwrap()
}

#[test]
fn pipe_round_trip_through_symbols() {
    let mut fds = [0 as c_int; 2];
    assert_eq!(unsafe { ntp_pipe(fds.as_mut_ptr()) }, 0);
    let msg = b"over the boundary";
    let wrote = unsafe { ntp_write(fds[1], msg.as_ptr().cast(), msg.len()) };
    assert_eq!(wrote, msg.len() as isize);
    let mut buf = [0u8; 32];
    let got = unsafe { ntp_read(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
    assert_eq!(&buf[..got as usize], msg);
    assert_eq!(ntp_close(fds[0]), 0);
    assert_eq!(ntp_close(fds[1]), 0);
}

#[test]
fn failures_set_errno() {
    assert_eq!(ntp_close(-1), -1);
    assert_eq!(ntp_errno(), EBADF);

    let missing = path("/no/such/thing");
    assert_eq!(unsafe { ntp_open(missing.as_ptr(), O_RDONLY, 0) }, -1);
    assert_eq!(ntp_errno(), ENOENT);

    assert_eq!(unsafe { ntp_open(std::ptr::null(), O_RDONLY, 0) }, -1);
    assert_eq!(ntp_errno(), EFAULT);
    assert_eq!(unsafe { ntp_pipe(std::ptr::null_mut()) }, -1);
    assert_eq!(ntp_errno(), EFAULT);
}

#[test]
fn null_device_stat_and_descriptor_flags() {
    let dev = path("/dev/null");
    let fd = unsafe { ntp_open(dev.as_ptr(), O_RDWR, 0) };
    assert!(fd >= 0);
    let mut st = Stat::default();
    assert_eq!(unsafe { ntp_fstat(fd, &mut st) }, 0);
    assert_eq!(st.file_type(), S_IFCHR);

    assert_eq!(ntp_fcntl(fd, F_SETFD, libc::c_long::from(FD_CLOEXEC)), 0);
    assert_eq!(ntp_fcntl(fd, F_GETFD, 0), FD_CLOEXEC);
    let copy = ntp_dup(fd);
    assert!(copy >= 0);
    assert_eq!(ntp_fcntl(copy, F_GETFD, 0), 0);

    assert_eq!(ntp_isatty(fd), 0);
    assert_eq!(ntp_errno(), ENOTTY);
    ntp_close(copy);
    ntp_close(fd);
}

#[test]
fn console_attributes_through_symbols() {
    let tty = path("/dev/tty");
    let fd = unsafe { ntp_open(tty.as_ptr(), O_RDWR, 0) };
    assert_eq!(ntp_isatty(fd), 1);
    let mut tio = Termios::default();
    assert_eq!(unsafe { ntp_tcgetattr(fd, &mut tio) }, 0);
    assert!(tio.canonical());
    assert_eq!(unsafe { ntp_tcsetattr(fd, TCSANOW, &tio) }, 0);
    assert_eq!(unsafe { ntp_tcgetattr(fd, std::ptr::null_mut()) }, -1);
    assert_eq!(ntp_errno(), EFAULT);
    ntp_close(fd);
}

#[test]
fn serial_line_control_through_symbols() {
    let com = path("/dev/ttyS0");
    let fd = unsafe { ntp_open(com.as_ptr(), O_RDWR, 0) };
    assert!(fd >= 0);
    assert_eq!(ntp_tcflush(fd, TCIOFLUSH as c_int), 0);
    assert_eq!(ntp_tcflow(fd, TCOOFF as c_int), 0);
    assert_eq!(ntp_tcflow(fd, TCOON as c_int), 0);
    assert_eq!(ntp_tcdrain(fd), 0);
    assert_eq!(ntp_tcsendbreak(fd, 0), 0);
    assert_eq!(ntp_tcflush(fd, 9), -1);
    ntp_close(fd);
}

#[test]
fn ptsname_names_the_slave() {
    let ptmx = path("/dev/ptmx");
    let master = unsafe { ntp_open(ptmx.as_ptr(), O_RDWR, 0) };
    assert!(master >= 0);
    let mut buf = [0u8; 32];
    assert_eq!(unsafe { ntp_ptsname_r(master, buf.as_mut_ptr().cast(), buf.len()) }, 0);
    let name = std::ffi::CStr::from_bytes_until_nul(&buf).unwrap().to_str().unwrap();
    assert!(name.starts_with("/dev/tty"));

    let slave_path = path(name);
    let slave = unsafe { ntp_open(slave_path.as_ptr(), O_RDWR, 0) };
    assert_eq!(ntp_isatty(slave), 1);

    let mut short = [0u8; 4];
    assert_eq!(
        unsafe { ntp_ptsname_r(master, short.as_mut_ptr().cast(), short.len()) },
        ERANGE
    );
    assert_eq!(ntp_errno(), ERANGE);
    ntp_close(slave);
    ntp_close(master);
}

#[test]
fn readlink_copies_without_terminator() {
    let link = path("/proc/sys/GLOBAL??/NUL");
    let mut buf = [0xffu8; 64];
    let n = unsafe { ntp_readlink(link.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
    assert_eq!(&buf[..n as usize], b"/proc/sys/Device/Null");
    assert_eq!(buf[n as usize], 0xff);

    let mut short = [0u8; 4];
    let n = unsafe { ntp_readlink(link.as_ptr(), short.as_mut_ptr().cast(), short.len()) };
    assert_eq!(n, 4);
    assert_eq!(&short, b"/pro");
}

#[test]
fn poll_and_socketpair() {
    let mut sv = [0 as c_int; 2];
    assert_eq!(unsafe { ntp_socketpair(1, 1, 0, sv.as_mut_ptr()) }, 0);
    let mut fds = [PollFd::new(sv[1], POLLIN)];
    assert_eq!(unsafe { ntp_poll(fds.as_mut_ptr(), 1, 0) }, 0);
    unsafe { ntp_write(sv[0], b"x".as_ptr().cast(), 1) };
    assert_eq!(unsafe { ntp_poll(fds.as_mut_ptr(), 1, 0) }, 1);
    assert_eq!(fds[0].revents, POLLIN);
    assert_eq!(ntp_shutdown(sv[0], 1), 0);
    ntp_close(sv[0]);
    ntp_close(sv[1]);
}

#[test]
fn signal_mask_reads_back() {
    let set: u64 = 1 << 9;
    let mut old = 0u64;
    assert_eq!(unsafe { ntp_sigprocmask(SIG_BLOCK, &set, &mut old) }, 0);
    let mut now = 0u64;
    assert_eq!(unsafe { ntp_sigprocmask(SIG_BLOCK, std::ptr::null(), &mut now) }, 0);
    assert_ne!(now & set, 0);
    assert_eq!(unsafe { ntp_sigprocmask(SIG_SETMASK, &old, std::ptr::null_mut()) }, 0);
}
