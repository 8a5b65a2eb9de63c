//! POSIX error numbers.
//!
//! Operations in this crate return `Result<T, Errno>`. The C-facing layer
//! turns an `Err` into `-1` and stores the number in the thread-local errno
//! kept here.

use std::cell::Cell;

use thiserror::Error;

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// A POSIX error number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
#[error("{} ({})", .0, errno_name(.0))]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Self = Self(1);
    pub const ENOENT: Self = Self(2);
    pub const ESRCH: Self = Self(3);
    pub const EINTR: Self = Self(4);
    pub const EIO: Self = Self(5);
    pub const ENXIO: Self = Self(6);
    pub const EBADF: Self = Self(9);
    pub const EAGAIN: Self = Self(11);
    pub const ENOMEM: Self = Self(12);
    pub const EACCES: Self = Self(13);
    pub const EFAULT: Self = Self(14);
    pub const EBUSY: Self = Self(16);
    pub const EEXIST: Self = Self(17);
    pub const ENODEV: Self = Self(19);
    pub const ENOTDIR: Self = Self(20);
    pub const EISDIR: Self = Self(21);
    pub const EINVAL: Self = Self(22);
    pub const ENFILE: Self = Self(23);
    pub const EMFILE: Self = Self(24);
    pub const ENOTTY: Self = Self(25);
    pub const ENOSPC: Self = Self(28);
    pub const ESPIPE: Self = Self(29);
    pub const EROFS: Self = Self(30);
    pub const EPIPE: Self = Self(32);
    pub const ERANGE: Self = Self(34);
    pub const ENOSYS: Self = Self(38);
    pub const ECOMM: Self = Self(70);
    pub const ENMFILE: Self = Self(89);
    pub const ENOTSOCK: Self = Self(88);
    pub const EPROTONOSUPPORT: Self = Self(93);
    pub const EOPNOTSUPP: Self = Self(95);
    pub const EAFNOSUPPORT: Self = Self(97);
    pub const ENOTCONN: Self = Self(107);
    pub const ENOMEDIUM: Self = Self(123);

    /// The raw number.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        errno_name(&self.0)
    }

    /// Which class of failure this number reports.
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::EIO => ErrorKind::Transient,
            Self::ENOSPC => ErrorKind::EndCondition,
            Self::EAGAIN => ErrorKind::WouldBlock,
            Self::EACCES | Self::EPERM | Self::EROFS => ErrorKind::PermissionDenied,
            Self::EPIPE | Self::ENXIO | Self::ENODEV | Self::ENOMEDIUM | Self::ECOMM
            | Self::ENOTCONN => ErrorKind::Broken,
            Self::EINTR => ErrorKind::Interrupted,
            Self::ENOMEM | Self::EMFILE | Self::ENFILE | Self::EBUSY => ErrorKind::Exhausted,
            _ => ErrorKind::Invalid,
        }
    }
}

/// Failure taxonomy shared by every handle variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Media changed or bus reset that outlived the retry bound.
    Transient,
    /// Pushed past an end-of-medium boundary that was already reported.
    EndCondition,
    WouldBlock,
    PermissionDenied,
    /// Peer gone or device absent.
    Broken,
    /// Wrong device, bad argument, unsupported operation.
    Invalid,
    Interrupted,
    /// Out of memory, descriptors or device availability.
    Exhausted,
}

fn errno_name(code: &i32) -> &'static str {
    match *code {
        1 => "EPERM",
        2 => "ENOENT",
        3 => "ESRCH",
        4 => "EINTR",
        5 => "EIO",
        6 => "ENXIO",
        9 => "EBADF",
        11 => "EAGAIN",
        12 => "ENOMEM",
        13 => "EACCES",
        14 => "EFAULT",
        16 => "EBUSY",
        17 => "EEXIST",
        19 => "ENODEV",
        20 => "ENOTDIR",
        21 => "EISDIR",
        22 => "EINVAL",
        23 => "ENFILE",
        24 => "EMFILE",
        25 => "ENOTTY",
        28 => "ENOSPC",
        29 => "ESPIPE",
        30 => "EROFS",
        32 => "EPIPE",
        34 => "ERANGE",
        38 => "ENOSYS",
        70 => "ECOMM",
        88 => "ENOTSOCK",
        89 => "ENMFILE",
        93 => "EPROTONOSUPPORT",
        95 => "EOPNOTSUPP",
        97 => "EAFNOSUPPORT",
        107 => "ENOTCONN",
        123 => "ENOMEDIUM",
        _ => "EUNKNOWN",
    }
}

/// Returns the current thread-local errno value.
pub fn get_errno() -> i32 {
    ERRNO.get()
}

/// Sets the current thread-local errno value.
pub fn set_errno(value: i32) {
    ERRNO.set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_name() {
        assert_eq!(Errno::EPIPE.to_string(), "32 (EPIPE)");
        assert_eq!(Errno(999).name(), "EUNKNOWN");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Errno::EAGAIN.kind(), ErrorKind::WouldBlock);
        assert_eq!(Errno::EINTR.kind(), ErrorKind::Interrupted);
        assert_eq!(Errno::ESPIPE.kind(), ErrorKind::Invalid);
        assert_eq!(Errno::EPIPE.kind(), ErrorKind::Broken);
        assert_eq!(Errno::ENOSPC.kind(), ErrorKind::EndCondition);
    }

    #[test]
    fn errno_is_thread_local() {
        set_errno(Errno::EBADF.code());
        let other = std::thread::spawn(get_errno).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(get_errno(), 9);
    }
}
