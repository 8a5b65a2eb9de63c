//! Open flags, `fcntl` commands, file types and the stat record.

// ---------------------------------------------------------------------------
// open(2) flags
// ---------------------------------------------------------------------------

pub const O_RDONLY: i32 = 0;
pub const O_WRONLY: i32 = 1;
pub const O_RDWR: i32 = 2;
pub const O_ACCMODE: i32 = 3;
pub const O_CREAT: i32 = 0o100;
pub const O_EXCL: i32 = 0o200;
pub const O_NOCTTY: i32 = 0o400;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;
pub const O_NONBLOCK: i32 = 0o4000;
pub const O_DIRECTORY: i32 = 0o200000;
pub const O_CLOEXEC: i32 = 0o2000000;

/// Status flags `F_SETFL` may change.
pub const SETFL_MASK: i32 = O_APPEND | O_NONBLOCK;

#[must_use]
pub const fn access_mode(flags: i32) -> i32 {
    flags & O_ACCMODE
}

#[must_use]
pub const fn is_readable(flags: i32) -> bool {
    matches!(access_mode(flags), O_RDONLY | O_RDWR)
}

#[must_use]
pub const fn is_writable(flags: i32) -> bool {
    matches!(access_mode(flags), O_WRONLY | O_RDWR)
}

// ---------------------------------------------------------------------------
// fcntl(2)
// ---------------------------------------------------------------------------

pub const F_DUPFD: i32 = 0;
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;
pub const F_DUPFD_CLOEXEC: i32 = 1030;
pub const FD_CLOEXEC: i32 = 1;

// ---------------------------------------------------------------------------
// lseek(2)
// ---------------------------------------------------------------------------

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    #[must_use]
    pub const fn from_raw(whence: i32) -> Option<Self> {
        match whence {
            SEEK_SET => Some(Self::Set),
            SEEK_CUR => Some(Self::Cur),
            SEEK_END => Some(Self::End),
            _ => None,
        }
    }
}

/// Resolve `offset` against `whence` for a stream of `size` bytes at `pos`.
/// `None` when the result would be negative or overflow.
#[must_use]
pub fn resolve_seek(pos: u64, size: u64, offset: i64, whence: Whence) -> Option<u64> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => pos,
        Whence::End => size,
    };
    base.checked_add_signed(offset)
}

// ---------------------------------------------------------------------------
// File types and stat
// ---------------------------------------------------------------------------

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

pub const DT_UNKNOWN: u8 = 0;
pub const DT_FIFO: u8 = 1;
pub const DT_CHR: u8 = 2;
pub const DT_DIR: u8 = 4;
pub const DT_BLK: u8 = 6;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;
pub const DT_SOCK: u8 = 12;

/// `d_type` for a mode.
#[must_use]
pub const fn dtype_of(mode: u32) -> u8 {
    match mode & S_IFMT {
        S_IFIFO => DT_FIFO,
        S_IFCHR => DT_CHR,
        S_IFDIR => DT_DIR,
        S_IFBLK => DT_BLK,
        S_IFREG => DT_REG,
        S_IFLNK => DT_LNK,
        S_IFSOCK => DT_SOCK,
        _ => DT_UNKNOWN,
    }
}

/// `struct stat`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl Stat {
    #[must_use]
    pub const fn file_type(&self) -> u32 {
        self.st_mode & S_IFMT
    }
}

/// One `readdir` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub d_ino: u64,
    pub d_type: u8,
    pub d_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_modes() {
        assert!(is_readable(O_RDONLY));
        assert!(!is_writable(O_RDONLY | O_NONBLOCK));
        assert!(is_writable(O_WRONLY | O_APPEND));
        assert!(is_readable(O_RDWR) && is_writable(O_RDWR));
    }

    #[test]
    fn seek_resolution() {
        assert_eq!(resolve_seek(10, 100, 5, Whence::Cur), Some(15));
        assert_eq!(resolve_seek(10, 100, -20, Whence::End), Some(80));
        assert_eq!(resolve_seek(10, 100, -11, Whence::Cur), None);
        assert_eq!(Whence::from_raw(7), None);
    }

    #[test]
    fn dtype_follows_mode() {
        assert_eq!(dtype_of(S_IFDIR | 0o555), DT_DIR);
        assert_eq!(dtype_of(S_IFLNK | 0o777), DT_LNK);
        assert_eq!(dtype_of(0o644), DT_UNKNOWN);
    }
}
