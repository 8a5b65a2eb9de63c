//! ABI layer for `<termios.h>`.

use std::ffi::{c_char, c_int};

use ntposix_core::errno::{Errno, set_errno};
use ntposix_core::termios::Termios;

use crate::runtime;
use crate::util::{fail, with_context};

/// # Safety
///
/// `termios_p` must be null or valid for one `Termios` write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_tcgetattr(fd: c_int, termios_p: *mut Termios) -> c_int {
    if termios_p.is_null() {
        return fail(Errno::EFAULT);
    }
    with_context(|ctx| {
        let tio = ctx.tcgetattr(fd)?;
        unsafe { termios_p.write(tio) };
        Ok(0)
    })
}

/// # Safety
///
/// `termios_p` must be null or point to a valid `Termios`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_tcsetattr(
    fd: c_int,
    optional_actions: c_int,
    termios_p: *const Termios,
) -> c_int {
    if termios_p.is_null() {
        return fail(Errno::EFAULT);
    }
    let tio = unsafe { termios_p.read() };
    with_context(|ctx| ctx.tcsetattr(fd, optional_actions, &tio).map(|()| 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_tcflush(fd: c_int, queue_selector: c_int) -> c_int {
    with_context(|ctx| ctx.tcflush(fd, i64::from(queue_selector)).map(|()| 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_tcdrain(fd: c_int) -> c_int {
    with_context(|ctx| ctx.tcdrain(fd).map(|()| 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_tcflow(fd: c_int, action: c_int) -> c_int {
    with_context(|ctx| ctx.tcflow(fd, i64::from(action)).map(|()| 0))
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_tcsendbreak(fd: c_int, duration: c_int) -> c_int {
    with_context(|ctx| ctx.tcsendbreak(fd, duration).map(|()| 0))
}

/// Returns 0 or an error number, which is also stored in errno.
///
/// # Safety
///
/// `buf` must be null or valid for `buflen` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_ptsname_r(fd: c_int, buf: *mut c_char, buflen: usize) -> c_int {
    if buf.is_null() {
        set_errno(Errno::EFAULT.code());
        return Errno::EFAULT.code();
    }
    let name = match runtime::context().and_then(|ctx| ctx.ptsname(fd)) {
        Ok(name) => name,
        Err(e) => {
            set_errno(e.code());
            return e.code();
        }
    };
    if name.len() >= buflen {
        set_errno(Errno::ERANGE.code());
        return Errno::ERANGE.code();
    }
    unsafe {
        std::ptr::copy_nonoverlapping(name.as_ptr(), buf.cast::<u8>(), name.len());
        buf.add(name.len()).write(0);
    }
    0
}
