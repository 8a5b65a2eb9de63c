//! `/proc/sys`: the NT object-manager namespace, with `/` standing in
//! for `\`.

use std::sync::Arc;

use ntposix_native::namespace::{DeviceType, NsEntry};
use ntposix_native::{NtStatus, Process};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath, hash_name};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::virt::{Exists, SPECIAL_DOT_FILE_COUNT, VirtBuffer, components, dot_entry};
use crate::fhandler::{FhBase, Fhandler, NtHandle};
use crate::flags::{
    DT_BLK, DT_CHR, DT_DIR, DT_FIFO, DT_LNK, DT_REG, Dirent, O_CLOEXEC, Stat, Whence,
    is_writable,
};

pub const PROCSYS_PREFIX: &str = "/proc/sys";

/// Owner reported for every entry (the Administrators group SID's RID).
const PROCSYS_UID: u32 = 544;
const PROCSYS_GID: u32 = 18;

/// NT path for a remainder below `/proc/sys`.
#[must_use]
pub fn nt_path(rest: &str) -> String {
    format!("\\{}", components(rest).join("\\"))
}

/// POSIX spelling of an NT link target.
#[must_use]
pub fn posix_target(target: &str) -> String {
    format!("{PROCSYS_PREFIX}{}", target.replace('\\', "/"))
}

fn classify(entry: &NsEntry) -> Exists {
    match entry {
        NsEntry::Directory(_) => Exists::Directory,
        NsEntry::SymbolicLink(_) => Exists::Symlink,
        NsEntry::Device(DeviceType::NamedPipe) => Exists::Pipe,
        NsEntry::Device(DeviceType::Disk) => Exists::BlockDevice,
        NsEntry::Device(_) => Exists::CharDevice,
        NsEntry::Object(_) => Exists::File,
    }
}

fn dtype(kind: Exists) -> u8 {
    match kind {
        Exists::Root | Exists::Directory => DT_DIR,
        Exists::Symlink => DT_LNK,
        Exists::Pipe => DT_FIFO,
        Exists::BlockDevice => DT_BLK,
        Exists::CharDevice => DT_CHR,
        Exists::File | Exists::None => DT_REG,
    }
}

#[derive(Debug, Default)]
struct SysState {
    exists: Option<Exists>,
    buf: VirtBuffer,
    dirpos: u64,
}

pub struct ProcSysHandler {
    base: FhBase,
    path: String,
    /// Directory object, for directories.
    dir: NtHandle,
    state: Mutex<SysState>,
}

impl ProcSysHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, rest: &str, flags: i32) -> Self {
        let dev = DevicePath::ProcSys(rest.to_owned()).device_id();
        Self {
            base: FhBase::new(env, DeviceClass::ProcSys, dev, name, flags),
            path: rest.to_owned(),
            dir: NtHandle::empty(),
            state: Mutex::new(SysState::default()),
        }
    }

    pub fn exists(&self) -> Exists {
        if components(&self.path).is_empty() {
            return Exists::Root;
        }
        match self.base.env().kernel.namespace().lookup(&nt_path(&self.path)) {
            Ok(entry) => classify(&entry),
            Err(_) => Exists::None,
        }
    }

    fn kind(&self) -> Exists {
        self.state.lock().exists.unwrap_or(Exists::None)
    }

    /// Content of a file entry. Takes the kind so the fill closure never
    /// touches `state`, which the caller holds.
    fn content(&self, kind: Exists) -> Result<Vec<u8>, Errno> {
        match kind {
            Exists::Symlink => Ok(self.readlink()?.into_bytes()),
            _ => Ok(Vec::new()),
        }
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}/{name}", self.base.name().trim_end_matches('/'))
    }
}

impl Fhandler for ProcSysHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let exists = self.exists();
        match exists {
            Exists::None => return Err(Errno::ENOENT),
            Exists::Pipe | Exists::BlockDevice | Exists::CharDevice => {
                log::debug!("{}: device objects cannot be opened here", self.base.name());
                return Err(Errno::ENXIO);
            }
            Exists::Root | Exists::Directory if is_writable(flags) => return Err(Errno::EISDIR),
            Exists::Root | Exists::Directory => {
                let env = self.base.env();
                let owned = env.kernel.open_directory_object(
                    &env.process,
                    &nt_path(&self.path),
                    flags & O_CLOEXEC == 0,
                )?;
                self.dir.bind(owned);
            }
            _ if is_writable(flags) => return Err(Errno::EROFS),
            Exists::Symlink | Exists::File => {}
        }
        let mut st = self.state.lock();
        st.exists = Some(exists);
        st.dirpos = 0;
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        let kind = self.kind();
        if kind.is_dir() {
            return Err(Errno::EISDIR);
        }
        self.state.lock().buf.read(buf, || self.content(kind))
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::EROFS)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let kind = self.kind();
        if kind.is_dir() {
            return Err(Errno::EINVAL);
        }
        self.state.lock().buf.seek(offset, whence, || self.content(kind))
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let kind = self.state.lock().exists.unwrap_or_else(|| self.exists());
        let mut st = self.base.stat();
        st.st_mode = kind.mode();
        st.st_uid = PROCSYS_UID;
        st.st_gid = PROCSYS_GID;
        if kind == Exists::Symlink {
            st.st_size = i64::try_from(self.readlink()?.len()).unwrap_or(i64::MAX);
        }
        if kind.is_dir() {
            st.st_nlink = 2;
        }
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        self.dir.close();
        Ok(())
    }

    fn readlink(&self) -> Result<String, Errno> {
        let target = self
            .base
            .env()
            .kernel
            .namespace()
            .query_symlink(&nt_path(&self.path))
            .map_err(|status| {
                if status == NtStatus::OBJECT_TYPE_MISMATCH {
                    Errno::EINVAL
                } else {
                    Errno::from(status)
                }
            })?;
        Ok(posix_target(&target))
    }

    fn readdir(&self) -> Result<Option<Dirent>, Errno> {
        if !self.kind().is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let mut st = self.state.lock();
        let pos = st.dirpos;
        if let Some(dot) = dot_entry(pos, self.base.name()) {
            st.dirpos += 1;
            return Ok(Some(dot));
        }
        let object = self.dir.object()?;
        let dir = object.as_directory()?;
        let index = usize::try_from(pos - SPECIAL_DOT_FILE_COUNT).unwrap_or(usize::MAX);
        let info = match dir.query_directory(index) {
            Ok(info) => info,
            Err(s) if s == NtStatus::NO_MORE_ENTRIES => return Ok(None),
            Err(s) => return Err(s.into()),
        };
        st.dirpos += 1;
        let kind = dir.entry(&info.name).map_or(Exists::File, |e| classify(&e));
        Ok(Some(Dirent {
            d_ino: hash_name(&self.child_path(&info.name)),
            d_type: dtype(kind),
            d_name: info.name,
        }))
    }

    fn telldir(&self) -> Result<u64, Errno> {
        if !self.kind().is_dir() {
            return Err(Errno::ENOTDIR);
        }
        Ok(self.state.lock().dirpos)
    }

    fn seekdir(&self, pos: u64) -> Result<(), Errno> {
        if !self.kind().is_dir() {
            return Err(Errno::ENOTDIR);
        }
        self.state.lock().dirpos = pos;
        Ok(())
    }

    fn rewinddir(&self) -> Result<(), Errno> {
        self.seekdir(0)
    }

    fn fchmod(&self, _mode: u32) -> Result<(), Errno> {
        Err(Errno::EROFS)
    }

    fn fchown(&self, _uid: u32, _gid: u32) -> Result<(), Errno> {
        Err(Errno::EPERM)
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        let dir = if self.dir.is_open() {
            self.dir.duplicate(true)?
        } else {
            NtHandle::empty()
        };
        let st = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            path: self.path.clone(),
            dir,
            state: Mutex::new(SysState {
                exists: st.exists,
                buf: st.buf.clone(),
                dirpos: st.dirpos,
            }),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let st = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            path: self.path.clone(),
            dir: self.dir.fork_copy(&child.process)?,
            state: Mutex::new(SysState {
                exists: st.exists,
                buf: st.buf.clone(),
                dirpos: st.dirpos,
            }),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.dir.fixup_after_fork(parent)
    }

    fn fixup_after_exec(&self) {
        self.state.lock().buf.invalidate();
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        if self.dir.is_open() {
            self.dir.set_inherit(!cloexec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_RDONLY, O_WRONLY, S_IFBLK, S_IFDIR, S_IFLNK};
    use crate::testing::TestRig;

    fn handler(rig: &TestRig, rest: &str) -> ProcSysHandler {
        ProcSysHandler::new(rig.env(), &format!("{PROCSYS_PREFIX}{rest}"), rest, O_RDONLY)
    }

    fn open(rig: &TestRig, rest: &str, flags: i32) -> Result<ProcSysHandler, Errno> {
        let fh = handler(rig, rest);
        fh.open(flags, 0)?;
        Ok(fh)
    }

    #[test]
    fn classification_by_object_type() {
        let rig = TestRig::new().build();
        assert_eq!(handler(&rig, "").exists(), Exists::Root);
        assert_eq!(handler(&rig, "/Device").exists(), Exists::Directory);
        assert_eq!(handler(&rig, "/GLOBAL??/NUL").exists(), Exists::Symlink);
        assert_eq!(handler(&rig, "/Device/NamedPipe").exists(), Exists::Pipe);
        assert_eq!(handler(&rig, "/Device/Floppy0").exists(), Exists::BlockDevice);
        assert_eq!(handler(&rig, "/Device/Null").exists(), Exists::CharDevice);
        assert_eq!(handler(&rig, "/Device/Nope").exists(), Exists::None);
    }

    #[test]
    fn symlinks_read_back_as_posix_paths() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "/GLOBAL??/NUL", O_RDONLY).unwrap();
        assert_eq!(fh.readlink().unwrap(), "/proc/sys/Device/Null");
        let mut buf = [0u8; 64];
        let n = fh.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"/proc/sys/Device/Null");
        let st = fh.fstat().unwrap();
        assert_eq!(st.file_type(), S_IFLNK);
        assert_eq!((st.st_uid, st.st_gid), (544, 18));
        assert_eq!(st.st_size, n as i64);
    }

    #[test]
    fn symlink_content_rereads_after_seek() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "/GLOBAL??/NUL", O_RDONLY).unwrap();
        assert_eq!(fh.lseek(0, Whence::End).unwrap(), 21);
        assert_eq!(fh.lseek(10, Whence::Set).unwrap(), 10);
        let mut buf = [0u8; 64];
        let n = fh.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Device/Null");
        fh.lseek(0, Whence::Set).unwrap();
        let n = fh.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"/proc/sys/Device/Null");
    }

    #[test]
    fn devices_and_writes_are_refused() {
        let rig = TestRig::new().build();
        assert_eq!(open(&rig, "/Device/Null", O_RDONLY).err(), Some(Errno::ENXIO));
        assert_eq!(open(&rig, "/Device", O_WRONLY).err(), Some(Errno::EISDIR));
        assert_eq!(open(&rig, "/GLOBAL??/NUL", O_WRONLY).err(), Some(Errno::EROFS));
        assert_eq!(open(&rig, "/Security", O_RDONLY).err(), Some(Errno::EACCES));
        assert_eq!(open(&rig, "/missing", O_RDONLY).err(), Some(Errno::ENOENT));
    }

    #[test]
    fn readdir_lists_objects_with_types() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "/Device", O_RDONLY).unwrap();
        assert_eq!(fh.fstat().unwrap().file_type(), S_IFDIR);
        let entries: Vec<Dirent> = std::iter::from_fn(|| fh.readdir().unwrap()).collect();
        assert_eq!(entries[0].d_name, ".");
        let floppy = entries.iter().find(|d| d.d_name == "Floppy0").unwrap();
        assert_eq!(floppy.d_type, DT_BLK);
        assert_eq!(floppy.d_ino, hash_name("/proc/sys/Device/Floppy0"));
        let pipe = entries.iter().find(|d| d.d_name == "NamedPipe").unwrap();
        assert_eq!(pipe.d_type, DT_FIFO);
        let disks = entries.iter().find(|d| d.d_name == "Harddisk0").unwrap();
        assert_eq!(disks.d_type, DT_DIR);
        assert_eq!(fh.readlink(), Err(Errno::EINVAL));
    }

    #[test]
    fn block_device_stat() {
        let rig = TestRig::new().build();
        let st = handler(&rig, "/Device/Floppy0").fstat().unwrap();
        assert_eq!(st.file_type(), S_IFBLK);
    }
}
