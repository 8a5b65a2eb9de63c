//! ABI layer for `poll`.

use std::ffi::c_int;

use ntposix_core::errno::Errno;
use ntposix_core::poll::PollFd;

use crate::util::{fail, with_context};

/// # Safety
///
/// `fds` must be null (only with `nfds == 0`) or valid for `nfds` entries of
/// reads and writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_poll(fds: *mut PollFd, nfds: libc::nfds_t, timeout: c_int) -> c_int {
    let Ok(len) = usize::try_from(nfds) else {
        return fail(Errno::EINVAL);
    };
    if fds.is_null() && len > 0 {
        return fail(Errno::EFAULT);
    }
    let slice: &mut [PollFd] = if len == 0 {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(fds, len) }
    };
    with_context(|ctx| {
        let ready = ctx.poll(slice, timeout)?;
        c_int::try_from(ready).map_err(|_| Errno::EINVAL)
    })
}
