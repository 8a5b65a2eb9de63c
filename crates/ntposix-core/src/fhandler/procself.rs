//! `/proc/self` and `/proc/<pid>` for the calling process.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::virt::{Exists, SPECIAL_DOT_FILE_COUNT, VirtBuffer, components, dot_entry, entry};
use crate::fhandler::{FhBase, Fhandler};
use crate::flags::{DT_DIR, DT_LNK, DT_REG, Dirent, Stat, Whence, is_writable};

/// Entries of a process directory, with their types.
pub const PROCESS_ENTRIES: [(&str, Exists); 9] = [
    ("fd", Exists::Directory),
    ("ppid", Exists::File),
    ("winpid", Exists::File),
    ("uid", Exists::File),
    ("gid", Exists::File),
    ("pgid", Exists::File),
    ("exename", Exists::File),
    ("cmdline", Exists::File),
    ("status", Exists::File),
];

/// Parse `fd/<n>` into the descriptor number.
#[must_use]
pub fn fd_link(rest: &str) -> Option<i32> {
    match components(rest).as_slice() {
        ["fd", n] if n.bytes().all(|b| b.is_ascii_digit()) => n.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct ProcState {
    exists: Option<Exists>,
    buf: VirtBuffer,
    dirpos: u64,
}

pub struct ProcSelfHandler {
    base: FhBase,
    pid: Option<u32>,
    path: String,
    state: Mutex<ProcState>,
}

impl ProcSelfHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, pid: Option<u32>, rest: &str, flags: i32) -> Self {
        let dev = DevicePath::Proc {
            pid,
            rest: rest.to_owned(),
        }
        .device_id();
        Self {
            base: FhBase::new(env, DeviceClass::ProcSelf, dev, name, flags),
            pid,
            path: rest.to_owned(),
            state: Mutex::new(ProcState::default()),
        }
    }

    fn is_self(&self) -> bool {
        self.pid.is_none_or(|pid| pid == self.base.env().pid())
    }

    pub fn exists(&self) -> Exists {
        if !self.is_self() {
            return Exists::None;
        }
        match components(&self.path).as_slice() {
            [] => Exists::Root,
            [name] => PROCESS_ENTRIES
                .iter()
                .find(|(n, _)| n == name)
                .map_or(Exists::None, |(_, kind)| *kind),
            ["fd", _] => match fd_link(&self.path) {
                Some(fd) if self.descriptor(fd).is_ok() => Exists::Symlink,
                _ => Exists::None,
            },
            _ => Exists::None,
        }
    }

    fn kind(&self) -> Exists {
        self.state.lock().exists.unwrap_or(Exists::None)
    }

    fn descriptor(&self, fd: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        let table = self.base.env().table().ok_or(Errno::ENOENT)?;
        table.get(fd).map_err(|_| Errno::ENOENT)
    }

    fn open_fds(&self) -> Vec<i32> {
        self.base
            .env()
            .table()
            .map(|t| t.open_fds())
            .unwrap_or_default()
    }

    /// Content of a leaf.
    fn content(&self) -> Result<Vec<u8>, Errno> {
        let env = self.base.env();
        let parts = components(&self.path);
        let text = match parts.as_slice() {
            ["ppid"] => format!("{}\n", env.process.ppid()),
            ["winpid"] => format!("{}\n", env.process.pid()),
            ["uid"] => format!("{}\n", env.user.uid),
            ["gid"] => format!("{}\n", env.user.gid),
            ["pgid"] => format!("{}\n", env.pgid),
            ["exename"] => env.exename(),
            ["cmdline"] => {
                let mut out = Vec::new();
                for arg in env.cmdline() {
                    out.extend_from_slice(arg.as_bytes());
                    out.push(0);
                }
                return Ok(out);
            }
            ["status"] => self.status(),
            ["fd", _] => self.readlink()?,
            _ => return Err(Errno::ENOENT),
        };
        Ok(text.into_bytes())
    }

    fn status(&self) -> String {
        let env = self.base.env();
        let exename = env.exename();
        let name = exename.rsplit('/').next().unwrap_or(&exename);
        format!(
            "Name:\t{name}\nState:\tR (running)\nTgid:\t{pid}\nPid:\t{pid}\nPPid:\t{ppid}\n\
             Uid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{gid}\t{gid}\t{gid}\t{gid}\n\
             FDSize:\t{fds}\nSigPnd:\t{pending:016x}\nSigBlk:\t{blocked:016x}\n",
            pid = env.pid(),
            ppid = env.process.ppid(),
            uid = env.user.uid,
            gid = env.user.gid,
            fds = self.open_fds().len(),
            pending = (1..=crate::signal::NSIG)
                .filter(|s| env.signals.is_pending(*s))
                .fold(0u64, |acc, s| acc | (1u64 << (s - 1))),
            blocked = env.signals.mask(),
        )
    }

    fn dir_entry(&self, pos: u64) -> Option<Dirent> {
        let index = usize::try_from(pos - SPECIAL_DOT_FILE_COUNT).ok()?;
        let dir = self.base.name();
        match self.kind() {
            Exists::Root => PROCESS_ENTRIES.get(index).map(|(name, kind)| {
                let d_type = if kind.is_dir() { DT_DIR } else { DT_REG };
                entry(dir, name, d_type)
            }),
            _ => {
                let fd = *self.open_fds().get(index)?;
                Some(entry(dir, &fd.to_string(), DT_LNK))
            }
        }
    }
}

impl Fhandler for ProcSelfHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let exists = self.exists();
        match exists {
            Exists::None => return Err(Errno::ENOENT),
            Exists::Root | Exists::Directory if is_writable(flags) => return Err(Errno::EISDIR),
            _ if is_writable(flags) => return Err(Errno::EROFS),
            _ => {}
        }
        let mut st = self.state.lock();
        st.exists = Some(exists);
        st.dirpos = 0;
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if self.kind().is_dir() {
            return Err(Errno::EISDIR);
        }
        self.state.lock().buf.read(buf, || self.content())
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::EROFS)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        if self.kind().is_dir() {
            return Err(Errno::EINVAL);
        }
        self.state.lock().buf.seek(offset, whence, || self.content())
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let kind = self.state.lock().exists.unwrap_or_else(|| self.exists());
        if kind == Exists::None {
            return Err(Errno::ENOENT);
        }
        let mut st = self.base.stat();
        st.st_mode = kind.mode();
        match kind {
            Exists::Root => st.st_nlink = 3,
            Exists::Directory => st.st_nlink = 2,
            _ => st.st_size = i64::try_from(self.content()?.len()).unwrap_or(i64::MAX),
        }
        Ok(st)
    }

    fn readlink(&self) -> Result<String, Errno> {
        let fd = fd_link(&self.path).ok_or(Errno::EINVAL)?;
        Ok(self.descriptor(fd)?.proc_name())
    }

    fn readdir(&self) -> Result<Option<Dirent>, Errno> {
        if !self.kind().is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let pos = self.state.lock().dirpos;
        let next = dot_entry(pos, self.base.name()).or_else(|| self.dir_entry(pos));
        if next.is_some() {
            self.state.lock().dirpos += 1;
        }
        Ok(next)
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
        let st = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            pid: self.pid,
            path: self.path.clone(),
            state: Mutex::new(ProcState {
                exists: st.exists,
                buf: st.buf.clone(),
                dirpos: st.dirpos,
            }),
        }))
    }

    /// `/proc/self` in the child names the child.
    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let st = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            pid: self.pid,
            path: self.path.clone(),
            state: Mutex::new(ProcState {
                exists: st.exists,
                buf: VirtBuffer::new(),
                dirpos: st.dirpos,
            }),
        }))
    }

    fn fixup_after_exec(&self) {
        self.state.lock().buf.invalidate();
    }
}
