use std::ffi::{CStr, c_char, c_int};

use ntposix_core::errno::{Errno, set_errno};

use crate::runtime;

/// Store `e` in errno and return the C failure value.
#[inline]
pub(crate) fn fail<T: From<i8>>(e: Errno) -> T {
    set_errno(e.code());
    T::from(-1)
}

/// Borrow a NUL-terminated path. Null is `EFAULT`, non-UTF-8 is `ENOENT`.
///
/// # Safety
///
/// `path` must be null or point to a NUL-terminated string that stays valid
/// for the returned lifetime.
pub(crate) unsafe fn c_path<'a>(path: *const c_char) -> Result<&'a str, Errno> {
    if path.is_null() {
        return Err(Errno::EFAULT);
    }
    let raw = unsafe { CStr::from_ptr(path) };
    raw.to_str().map_err(|_| Errno::ENOENT)
}

/// Run `f` against the process context, mapping the result to a C int.
pub(crate) fn with_context(
    f: impl FnOnce(&ntposix_core::ProcessContext) -> Result<c_int, Errno>,
) -> c_int {
    match runtime::context().and_then(f) {
        Ok(v) => v,
        Err(e) => fail(e),
    }
}
