//! Pieces shared by the virtual namespaces (`/proc/registry`, `/proc/sys`,
//! `/proc/<pid>`): path classification, the lazily filled content buffer
//! and directory entries.

use crate::device::hash_name;
use crate::errno::Errno;
use crate::flags::{
    DT_DIR, Dirent, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, Whence, resolve_seek,
};

/// `.` and `..` come first in every listing.
pub const SPECIAL_DOT_FILE_COUNT: u64 = 2;

/// What a virtual path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exists {
    None,
    Root,
    Directory,
    File,
    Symlink,
    Pipe,
    BlockDevice,
    CharDevice,
}

impl Exists {
    /// File type and permission bits reported by `fstat`.
    #[must_use]
    pub const fn mode(self) -> u32 {
        match self {
            Self::Root | Self::Directory => S_IFDIR | 0o555,
            Self::File => S_IFREG | 0o444,
            Self::Symlink => S_IFLNK | 0o777,
            Self::Pipe => S_IFIFO | 0o666,
            Self::BlockDevice => S_IFBLK | 0o666,
            Self::CharDevice => S_IFCHR | 0o666,
            Self::None => 0,
        }
    }

    #[must_use]
    pub const fn is_dir(self) -> bool {
        matches!(self, Self::Root | Self::Directory)
    }
}

/// Split a namespace remainder into its components.
#[must_use]
pub fn components(rest: &str) -> Vec<&str> {
    rest.split('/').filter(|c| !c.is_empty()).collect()
}

/// `.` or `..` for the first two directory positions.
#[must_use]
pub fn dot_entry(pos: u64, dir: &str) -> Option<Dirent> {
    let name = match pos {
        0 => ".",
        1 => "..",
        _ => return None,
    };
    Some(Dirent {
        d_ino: hash_name(&format!("{dir}/{name}")),
        d_type: DT_DIR,
        d_name: name.to_owned(),
    })
}

/// A directory entry named `name` below `dir`.
#[must_use]
pub fn entry(dir: &str, name: &str, d_type: u8) -> Dirent {
    Dirent {
        d_ino: hash_name(&format!("{}/{name}", dir.trim_end_matches('/'))),
        d_type,
        d_name: name.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Content buffer
// ---------------------------------------------------------------------------

/// Synthetic file content, materialised on demand.
///
/// The buffer is refilled whenever a read starts at offset 0 and on every
/// seek, so a reader that rewinds sees current content.
#[derive(Debug, Clone, Default)]
pub struct VirtBuffer {
    data: Vec<u8>,
    pos: u64,
    filled: bool,
}

impl VirtBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[must_use]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn fill(&mut self, source: impl FnOnce() -> Result<Vec<u8>, Errno>) -> Result<(), Errno> {
        self.data = source()?;
        self.filled = true;
        Ok(())
    }

    /// Forget the content; the next read or seek refills it.
    pub fn invalidate(&mut self) {
        self.filled = false;
        self.pos = 0;
    }

    pub fn read(
        &mut self,
        out: &mut [u8],
        source: impl FnOnce() -> Result<Vec<u8>, Errno>,
    ) -> Result<usize, Errno> {
        if !self.filled || self.pos == 0 {
            self.fill(source)?;
        }
        let Ok(start) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = out.len().min(self.data.len() - start);
        out[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    pub fn seek(
        &mut self,
        offset: i64,
        whence: Whence,
        source: impl FnOnce() -> Result<Vec<u8>, Errno>,
    ) -> Result<u64, Errno> {
        self.fill(source)?;
        let target = resolve_seek(self.pos, self.size(), offset, whence).ok_or(Errno::EINVAL)?;
        self.pos = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refills_when_reading_from_the_start() {
        let mut fills = 0;
        let mut buf = VirtBuffer::new();
        let mut out = [0u8; 3];
        assert_eq!(
            buf.read(&mut out, || {
                fills += 1;
                Ok(b"abcde".to_vec())
            })
            .unwrap(),
            3
        );
        assert_eq!(buf.read(&mut out, || unreachable!()).unwrap(), 2);
        assert_eq!(&out[..2], b"de");
        assert_eq!(buf.read(&mut out, || unreachable!()).unwrap(), 0);
        assert_eq!(fills, 1);
    }

    #[test]
    fn seek_refills_and_checks_bounds() {
        let mut buf = VirtBuffer::new();
        assert_eq!(buf.seek(-2, Whence::End, || Ok(b"1234".to_vec())).unwrap(), 2);
        assert_eq!(
            buf.seek(-3, Whence::Cur, || Ok(b"1234".to_vec())),
            Err(Errno::EINVAL)
        );
        let mut out = [0u8; 4];
        assert_eq!(buf.read(&mut out, || unreachable!()).unwrap(), 2);
        assert_eq!(&out[..2], b"34");
    }

    #[test]
    fn fill_errors_propagate() {
        let mut buf = VirtBuffer::new();
        let mut out = [0u8; 1];
        assert_eq!(buf.read(&mut out, || Err(Errno::EACCES)), Err(Errno::EACCES));
        assert!(!buf.is_filled());
    }

    #[test]
    fn classification_modes() {
        assert_eq!(Exists::Directory.mode(), S_IFDIR | 0o555);
        assert!(Exists::Root.is_dir());
        assert!(!Exists::Symlink.is_dir());
        assert_eq!(dot_entry(1, "/proc").map(|d| d.d_name), Some("..".to_owned()));
        assert_eq!(dot_entry(2, "/proc"), None);
        assert_eq!(components("/a//b/"), vec!["a", "b"]);
    }
}
