//! ABI layer for descriptor I/O (`open`, `read`, `write`, `lseek`, `dup`,
//! `fcntl`, `pipe`, `fstat`).

use std::ffi::{c_char, c_int, c_void};

use ntposix_core::errno::Errno;
use ntposix_core::flags::Stat;

use crate::runtime;
use crate::util::{c_path, fail, with_context};

// ---------------------------------------------------------------------------
// open / close
// ---------------------------------------------------------------------------

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_open(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
    let path = match unsafe { c_path(path) } {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    with_context(|ctx| ctx.open(path, flags, mode))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_close(fd: c_int) -> c_int {
    with_context(|ctx| ctx.close(fd).map(|()| 0))
}

// ---------------------------------------------------------------------------
// read / write
// ---------------------------------------------------------------------------

/// # Safety
///
/// `buf` must be null (only with `count == 0`) or valid for `count` bytes of
/// writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_read(fd: c_int, buf: *mut c_void, count: usize) -> libc::ssize_t {
    if buf.is_null() && count > 0 {
        return fail(Errno::EFAULT);
    }
    let slice: &mut [u8] = if count == 0 {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), count) }
    };
    match runtime::context().and_then(|ctx| ctx.read(fd, slice)) {
        Ok(n) => n as libc::ssize_t,
        Err(e) => fail(e),
    }
}

/// # Safety
///
/// `buf` must be null (only with `count == 0`) or valid for `count` bytes of
/// reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_write(fd: c_int, buf: *const c_void, count: usize) -> libc::ssize_t {
    if buf.is_null() && count > 0 {
        return fail(Errno::EFAULT);
    }
    let slice: &[u8] = if count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), count) }
    };
    match runtime::context().and_then(|ctx| ctx.write(fd, slice)) {
        Ok(n) => n as libc::ssize_t,
        Err(e) => fail(e),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_lseek(fd: c_int, offset: libc::off_t, whence: c_int) -> libc::off_t {
    let result = runtime::context()
        .and_then(|ctx| ctx.lseek(fd, offset, whence))
        .and_then(|pos| libc::off_t::try_from(pos).map_err(|_| Errno::EINVAL));
    match result {
        Ok(pos) => pos,
        Err(e) => fail(e),
    }
}

// ---------------------------------------------------------------------------
// dup / fcntl
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn ntp_dup(oldfd: c_int) -> c_int {
    with_context(|ctx| ctx.dup(oldfd))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_dup2(oldfd: c_int, newfd: c_int) -> c_int {
    with_context(|ctx| ctx.dup2(oldfd, newfd))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_fcntl(fd: c_int, cmd: c_int, arg: libc::c_long) -> c_int {
    with_context(|ctx| {
        let rc = ctx.fcntl(fd, cmd, i64::from(arg))?;
        c_int::try_from(rc).map_err(|_| Errno::EINVAL)
    })
}

// ---------------------------------------------------------------------------
// pipe
// ---------------------------------------------------------------------------

/// # Safety
///
/// `pipefd` must be null or valid for two `c_int` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_pipe2(pipefd: *mut c_int, flags: c_int) -> c_int {
    if pipefd.is_null() {
        return fail(Errno::EFAULT);
    }
    with_context(|ctx| {
        let [r, w] = ctx.pipe(flags)?;
        unsafe {
            *pipefd = r;
            *pipefd.add(1) = w;
        }
        Ok(0)
    })
}

/// # Safety
///
/// `pipefd` must be null or valid for two `c_int` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_pipe(pipefd: *mut c_int) -> c_int {
    unsafe { ntp_pipe2(pipefd, 0) }
}

// ---------------------------------------------------------------------------
// fstat
// ---------------------------------------------------------------------------

/// # Safety
///
/// `buf` must be null or valid for one `Stat` write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_fstat(fd: c_int, buf: *mut Stat) -> c_int {
    if buf.is_null() {
        return fail(Errno::EFAULT);
    }
    with_context(|ctx| {
        let st = ctx.fstat(fd)?;
        unsafe { buf.write(st) };
        Ok(0)
    })
}
