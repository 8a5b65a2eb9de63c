//! ABI layer for the emulated signal state (`raise`, `sigprocmask`).
//!
//! Signal sets are plain 64-bit masks: bit `n - 1` stands for signal `n`.

use std::ffi::c_int;

use ntposix_core::errno::Errno;
use ntposix_core::signal::MaskHow;

use crate::util::{fail, with_context};

pub const SIG_BLOCK: c_int = 0;
pub const SIG_UNBLOCK: c_int = 1;
pub const SIG_SETMASK: c_int = 2;

#[unsafe(no_mangle)]
pub extern "C" fn ntp_raise(sig: c_int) -> c_int {
    with_context(|ctx| ctx.raise(sig).map(|()| 0))
}

/// # Safety
///
/// `set` and `oldset` must each be null or valid for one `u64`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ntp_sigprocmask(how: c_int, set: *const u64, oldset: *mut u64) -> c_int {
    let how = match how {
        SIG_BLOCK => MaskHow::Block,
        SIG_UNBLOCK => MaskHow::Unblock,
        SIG_SETMASK => MaskHow::SetMask,
        _ => return fail(Errno::EINVAL),
    };
    with_context(|ctx| {
        let old = if set.is_null() {
            // Block nothing: reads the mask back unchanged.
            ctx.sigprocmask(MaskHow::Block, 0)
        } else {
            ctx.sigprocmask(how, unsafe { set.read() })
        };
        if !oldset.is_null() {
            unsafe { oldset.write(old) };
        }
        Ok(0)
    })
}
