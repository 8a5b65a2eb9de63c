//! ABI layer for local socket pairs.

use std::ffi::c_int;

use ntposix_core::errno::Errno;

use crate::util::{fail, with_context};

/// # Safety
///
/// `sv` must be null or valid for two `c_int` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_socketpair(
    domain: c_int,
    kind: c_int,
    protocol: c_int,
    sv: *mut c_int,
) -> c_int {
    if sv.is_null() {
        return fail(Errno::EFAULT);
    }
    with_context(|ctx| {
        let [a, b] = ctx.socketpair(domain, kind, protocol)?;
        unsafe {
            *sv = a;
            *sv.add(1) = b;
        }
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_shutdown(fd: c_int, how: c_int) -> c_int {
    with_context(|ctx| ctx.shutdown(fd, how).map(|()| 0))
}
