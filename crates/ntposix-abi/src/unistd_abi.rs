//! ABI layer for path and metadata calls (`mkfifo`, `unlink`, `readlink`,
//! `isatty`, `fchmod`, `fchown`).

use std::ffi::{c_char, c_int};

use ntposix_core::errno::{Errno, set_errno};

use crate::runtime;
use crate::util::{c_path, fail, with_context};

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_mkfifo(path: *const c_char, mode: libc::mode_t) -> c_int {
    let path = match unsafe { c_path(path) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    with_context(|ctx| ctx.mkfifo(path, mode).map(|()| 0))
}

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_unlink(path: *const c_char) -> c_int {
    let path = match unsafe { c_path(path) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    with_context(|ctx| ctx.unlink(path).map(|()| 0))
}

/// Copies at most `bufsiz` bytes of the link target; no NUL is appended.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string; `buf` must be null
/// or valid for `bufsiz` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_readlink(
    path: *const c_char,
    buf: *mut c_char,
    bufsiz: usize,
) -> libc::ssize_t {
    if buf.is_null() {
        return fail(Errno::EFAULT);
    }
    let path = match unsafe { c_path(path) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    match runtime::context().and_then(|ctx| ctx.readlink(path)) {
        Ok(target) => {
            let n = target.len().min(bufsiz);
            unsafe { std::ptr::copy_nonoverlapping(target.as_ptr(), buf.cast::<u8>(), n) };
            n as libc::ssize_t
        }
        Err(e) => fail(e),
    }
}

/// 1 for a terminal; otherwise 0 with errno `ENOTTY` or `EBADF`.
#[unsafe(no_mangle)]
pub extern "C" fn ntp_isatty(fd: c_int) -> c_int {
    match runtime::context().and_then(|ctx| ctx.isatty(fd)) {
        Ok(true) => 1,
        Ok(false) => {
            set_errno(Errno::ENOTTY.code());
            0
        }
        Err(e) => {
            set_errno(e.code());
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_fchmod(fd: c_int, mode: libc::mode_t) -> c_int {
    with_context(|ctx| ctx.fchmod(fd, mode).map(|()| 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_fchown(fd: c_int, uid: libc::uid_t, gid: libc::gid_t) -> c_int {
    with_context(|ctx| ctx.fchown(fd, uid, gid).map(|()| 0))
}
