//! Thread-local errno accessors.

use std::ffi::c_int;

use ntposix_core::errno::{get_errno, set_errno};

#[unsafe(no_mangle)]
pub extern "C" fn ntp_errno() -> c_int {
    get_errno()
}

#[unsafe(no_mangle)]
pub extern "C" fn ntp_set_errno(value: c_int) {
    set_errno(value);
}
