//! `/proc/registry`: the registry hive as a read-only directory tree.
//!
//! Keys are directories, values are files. The root lists the predefined
//! keys. A key's default value shows up as `@`. Paths are classified by
//! opening the parent key and enumerating its children, so keys that
//! cannot be opened still list and stat correctly.

use std::sync::Arc;

use ntposix_native::registry::{PredefinedKey, RegKey, RegValueType};
use ntposix_native::{Process, WinError};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::virt::{
    Exists, SPECIAL_DOT_FILE_COUNT, VirtBuffer, components, dot_entry, entry,
};
use crate::fhandler::{FhBase, Fhandler, NtHandle};
use crate::flags::{
    DT_DIR, DT_REG, Dirent, O_APPEND, O_CLOEXEC, O_CREAT, O_EXCL, Stat, Whence, is_writable,
};

/// Name under which a key's default (unnamed) value is listed.
pub const DEFAULT_VALUE_NAME: &str = "@";

/// `telldir` positions with this bit set are in the value phase.
pub const REG_ENUM_VALUES_MASK: u64 = 0x800_0000;
const REG_POSITION_MASK: u64 = 0xffff;

const ROOT_KEYS: [PredefinedKey; 6] = [
    PredefinedKey::ClassesRoot,
    PredefinedKey::CurrentConfig,
    PredefinedKey::CurrentUser,
    PredefinedKey::LocalMachine,
    PredefinedKey::Users,
    PredefinedKey::PerformanceData,
];

fn value_name(component: &str) -> &str {
    if component == DEFAULT_VALUE_NAME {
        ""
    } else {
        component
    }
}

fn listed_value_name(name: String) -> String {
    if name.is_empty() {
        DEFAULT_VALUE_NAME.to_owned()
    } else {
        name
    }
}

fn utf16_text(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Bytes a reader sees for a value of type `kind`.
fn render(kind: RegValueType, data: Vec<u8>) -> Vec<u8> {
    match kind {
        RegValueType::Sz | RegValueType::ExpandSz | RegValueType::Link => {
            utf16_text(&data).trim_end_matches('\0').as_bytes().to_vec()
        }
        RegValueType::MultiSz => utf16_text(&data).into_bytes(),
        _ => data,
    }
}

/// Fetch a value: size query first, then data queries with a growing
/// buffer for values whose size changes under us.
fn fetch_value(key: &RegKey, name: &str) -> Result<Vec<u8>, Errno> {
    let (_, size) = key.query_value(name, None)?;
    let mut buf = vec![0u8; size.max(16)];
    loop {
        match key.query_value(name, Some(&mut buf)) {
            Ok((kind, len)) => {
                buf.truncate(len);
                return Ok(render(kind, buf));
            }
            Err(e) if e == WinError::MORE_DATA => {
                log::trace!("registry value {name:?}: {} bytes too small", buf.len());
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn has_subkey(key: &RegKey, name: &str) -> bool {
    (0..)
        .map_while(|i| key.enum_key(i).ok())
        .any(|k| k.eq_ignore_ascii_case(name))
}

fn has_value(key: &RegKey, name: &str) -> bool {
    (0..)
        .map_while(|i| key.enum_value(i).ok())
        .any(|(v, _)| v.eq_ignore_ascii_case(name))
}

#[derive(Debug, Default)]
struct RegState {
    exists: Option<Exists>,
    buf: VirtBuffer,
    dirpos: u64,
}

pub struct RegistryHandler {
    base: FhBase,
    /// Remainder below `/proc/registry`.
    path: String,
    /// The key itself for directories, the parent key for values.
    key: NtHandle,
    state: Mutex<RegState>,
}

impl RegistryHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, rest: &str, flags: i32) -> Self {
        let dev = DevicePath::Registry(rest.to_owned()).device_id();
        Self {
            base: FhBase::new(env, DeviceClass::Registry, dev, name, flags),
            path: rest.to_owned(),
            key: NtHandle::empty(),
            state: Mutex::new(RegState::default()),
        }
    }

    /// Hive and subkey path of `parts`.
    fn split_parts(parts: &[&str]) -> Result<(PredefinedKey, String), Errno> {
        let (hive, rest) = parts.split_first().ok_or(Errno::ENOENT)?;
        let root = PredefinedKey::from_name(hive).ok_or(Errno::ENOENT)?;
        Ok((root, rest.join("\\")))
    }

    fn open_key(&self, parts: &[&str], inherit: bool) -> Result<ntposix_native::OwnedHandle, Errno> {
        let env = self.base.env();
        let (root, sub) = Self::split_parts(parts)?;
        Ok(env
            .kernel
            .open_registry_key(&env.process, root, &sub, inherit)?)
    }

    /// Classify the path by looking it up in its parent key.
    pub fn exists(&self) -> Exists {
        let parts = components(&self.path);
        let Some((last, parent)) = parts.split_last() else {
            return Exists::Root;
        };
        if parent.is_empty() {
            return if PredefinedKey::from_name(last).is_some() {
                Exists::Directory
            } else {
                Exists::None
            };
        }
        let env = self.base.env();
        let Ok((root, sub)) = Self::split_parts(parent) else {
            return Exists::None;
        };
        let Ok(key) = env.kernel.registry().root(root).open(&sub) else {
            return Exists::None;
        };
        if has_subkey(&key, last) {
            Exists::Directory
        } else if has_value(&key, value_name(last)) {
            Exists::File
        } else {
            Exists::None
        }
    }

    fn kind(&self) -> Exists {
        self.state.lock().exists.unwrap_or(Exists::None)
    }

    fn value(&self) -> Result<Vec<u8>, Errno> {
        let parts = components(&self.path);
        let last = parts.last().copied().unwrap_or_default();
        let object = self.key.object()?;
        fetch_value(object.as_registry_key()?, value_name(last))
    }

    fn key_info(&self) -> Option<ntposix_native::registry::KeyInfo> {
        let object = self.key.object().ok()?;
        Some(object.as_registry_key().ok()?.query_info())
    }

    fn dir_name(&self) -> String {
        self.base.name().trim_end_matches('/').to_owned()
    }

    fn read_root(&self, pos: u64) -> Option<Dirent> {
        let index = usize::try_from(pos - SPECIAL_DOT_FILE_COUNT).ok()?;
        let hive = ROOT_KEYS.get(index)?;
        Some(entry(&self.dir_name(), hive.name(), DT_DIR))
    }

    /// Next entry at `pos`, and the position after it.
    fn read_key(&self, pos: u64) -> Result<Option<(Dirent, u64)>, Errno> {
        let object = self.key.object()?;
        let key = object.as_registry_key()?;
        let dir = self.dir_name();
        if pos & REG_ENUM_VALUES_MASK == 0 {
            let index = usize::try_from(pos - SPECIAL_DOT_FILE_COUNT).unwrap_or(usize::MAX);
            match key.enum_key(index) {
                Ok(name) => return Ok(Some((entry(&dir, &name, DT_DIR), pos + 1))),
                Err(e) if e == WinError::NO_MORE_ITEMS => {}
                Err(e) => return Err(e.into()),
            }
            return self.read_key(REG_ENUM_VALUES_MASK);
        }
        let index = usize::try_from(pos & REG_POSITION_MASK).unwrap_or(usize::MAX);
        match key.enum_value(index) {
            Ok((name, _)) => {
                let name = listed_value_name(name);
                Ok(Some((entry(&dir, &name, DT_REG), pos + 1)))
            }
            Err(e) if e == WinError::NO_MORE_ITEMS => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Fhandler for RegistryHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let exists = self.exists();
        let inherit = flags & O_CLOEXEC == 0;
        let excl = flags & (O_CREAT | O_EXCL) == O_CREAT | O_EXCL;
        let parts = components(&self.path);
        match exists {
            Exists::None => {
                return Err(if flags & O_CREAT != 0 {
                    Errno::EROFS
                } else {
                    Errno::ENOENT
                });
            }
            _ if excl => return Err(Errno::EEXIST),
            Exists::Root | Exists::Directory if is_writable(flags) => return Err(Errno::EISDIR),
            Exists::Root => {}
            Exists::Directory => self.key.bind(self.open_key(&parts, inherit)?),
            _ if is_writable(flags) => return Err(Errno::EROFS),
            _ => {
                let parent = &parts[..parts.len().saturating_sub(1)];
                self.key.bind(self.open_key(parent, inherit)?);
            }
        }
        let mut st = self.state.lock();
        st.exists = Some(exists);
        st.dirpos = 0;
        if exists == Exists::File {
            st.buf.fill(|| self.value())?;
            if flags & O_APPEND != 0 {
                st.buf.seek(0, Whence::End, || self.value())?;
            }
        }
        log::debug!("{}: opened as {exists:?}", self.base.name());
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if self.kind().is_dir() {
            return Err(Errno::EISDIR);
        }
        self.state.lock().buf.read(buf, || self.value())
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::EROFS)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        if self.kind().is_dir() {
            return Err(Errno::EINVAL);
        }
        self.state.lock().buf.seek(offset, whence, || self.value())
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let kind = self.kind();
        let mut st = self.base.stat();
        st.st_mode = kind.mode();
        match kind {
            Exists::Root => st.st_nlink = ROOT_KEYS.len() as u32 + 2,
            Exists::Directory => {
                let subkeys = self.key_info().map_or(0, |info| info.subkeys);
                st.st_nlink = u32::try_from(subkeys + 2).unwrap_or(u32::MAX);
            }
            _ => {
                let mut state = self.state.lock();
                if !state.buf.is_filled() {
                    state.buf.fill(|| self.value())?;
                }
                st.st_size = i64::try_from(state.buf.size()).unwrap_or(i64::MAX);
            }
        }
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        self.key.close();
        Ok(())
    }

    fn readdir(&self) -> Result<Option<Dirent>, Errno> {
        let kind = self.kind();
        if !kind.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let mut st = self.state.lock();
        let pos = st.dirpos;
        if let Some(dot) = dot_entry(pos, &self.dir_name()) {
            st.dirpos += 1;
            return Ok(Some(dot));
        }
        if kind == Exists::Root {
            let next = self.read_root(pos);
            if next.is_some() {
                st.dirpos += 1;
            }
            return Ok(next);
        }
        match self.read_key(pos)? {
            Some((dirent, next)) => {
                st.dirpos = next;
                Ok(Some(dirent))
            }
            None => Ok(None),
        }
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
        let key = if self.key.is_open() {
            self.key.duplicate(true)?
        } else {
            NtHandle::empty()
        };
        let state = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            path: self.path.clone(),
            key,
            state: Mutex::new(RegState {
                exists: state.exists,
                buf: state.buf.clone(),
                dirpos: state.dirpos,
            }),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let state = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            path: self.path.clone(),
            key: self.key.fork_copy(&child.process)?,
            state: Mutex::new(RegState {
                exists: state.exists,
                buf: state.buf.clone(),
                dirpos: state.dirpos,
            }),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.key.fixup_after_fork(parent)
    }

    fn fixup_after_exec(&self) {
        self.state.lock().buf.invalidate();
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        if self.key.is_open() {
            self.key.set_inherit(!cloexec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_RDONLY, O_RDWR, O_WRONLY, S_IFDIR, S_IFREG};
    use crate::testing::TestRig;

    const VERSION: &str = "/HKEY_LOCAL_MACHINE/SOFTWARE/Microsoft/Windows NT/CurrentVersion";

    fn handler(rig: &TestRig, rest: &str) -> RegistryHandler {
        RegistryHandler::new(rig.env(), &format!("/proc/registry{rest}"), rest, O_RDONLY)
    }

    fn open(rig: &TestRig, rest: &str, flags: i32) -> Result<RegistryHandler, Errno> {
        let fh = handler(rig, rest);
        fh.open(flags, 0)?;
        Ok(fh)
    }

    fn read_all(fh: &RegistryHandler) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = fh.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn names(fh: &RegistryHandler) -> Vec<String> {
        std::iter::from_fn(|| fh.readdir().unwrap())
            .map(|d| d.d_name)
            .collect()
    }

    #[test]
    fn classification() {
        let rig = TestRig::new().build();
        assert_eq!(handler(&rig, "").exists(), Exists::Root);
        assert_eq!(handler(&rig, "/HKEY_USERS").exists(), Exists::Directory);
        assert_eq!(handler(&rig, "/HKEY_NOPE").exists(), Exists::None);
        assert_eq!(handler(&rig, VERSION).exists(), Exists::Directory);
        assert_eq!(
            handler(&rig, &format!("{VERSION}/ProductName")).exists(),
            Exists::File
        );
        assert_eq!(handler(&rig, &format!("{VERSION}/@")).exists(), Exists::File);
        // Listed by the parent even though it cannot be opened.
        assert_eq!(handler(&rig, "/HKEY_LOCAL_MACHINE/SAM").exists(), Exists::Directory);
    }

    #[test]
    fn open_errors() {
        let rig = TestRig::new().build();
        assert_eq!(open(&rig, "", O_CREAT | O_EXCL).err(), Some(Errno::EEXIST));
        assert_eq!(open(&rig, "/HKEY_USERS", O_WRONLY).err(), Some(Errno::EISDIR));
        let value = format!("{VERSION}/ProductName");
        assert_eq!(open(&rig, &value, O_RDWR).err(), Some(Errno::EROFS));
        assert_eq!(open(&rig, &format!("{VERSION}/Missing"), O_RDONLY).err(), Some(Errno::ENOENT));
        assert_eq!(open(&rig, "/HKEY_LOCAL_MACHINE/SAM", O_RDONLY).err(), Some(Errno::EACCES));
    }

    #[test]
    fn value_content_rereads_identically() {
        let rig = TestRig::new().build();
        let fh = open(&rig, &format!("{VERSION}/ProductName"), O_RDONLY).unwrap();
        let first = read_all(&fh);
        assert_eq!(first, b"ntposix simulated kernel");
        fh.lseek(0, Whence::Set).unwrap();
        assert_eq!(read_all(&fh), first);
        assert_eq!(fh.write(b"x"), Err(Errno::EROFS));
        let st = fh.fstat().unwrap();
        assert_eq!(st.file_type(), S_IFREG);
        assert_eq!(st.st_size, first.len() as i64);
        assert_eq!(st.st_mode & 0o222, 0);
    }

    #[test]
    fn volatile_values_grow_the_buffer() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "/HKEY_PERFORMANCE_DATA/Global", O_RDONLY).unwrap();
        let data = read_all(&fh);
        assert_eq!(data.len(), 4096);
        assert_eq!(data[300], (300 % 251) as u8);
    }

    #[test]
    fn append_starts_at_the_end() {
        let rig = TestRig::new().build();
        let fh = open(&rig, &format!("{VERSION}/CurrentBuildNumber"), O_RDONLY | O_APPEND).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn root_lists_predefined_keys() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "", O_RDONLY).unwrap();
        let listed = names(&fh);
        assert_eq!(listed[..2], [".", ".."]);
        assert_eq!(listed.len(), 8);
        assert!(listed.contains(&"HKEY_LOCAL_MACHINE".to_owned()));
        assert_eq!(fh.fstat().unwrap().st_nlink, 8);
    }

    #[test]
    fn readdir_crosses_from_subkeys_to_values() {
        let rig = TestRig::new().build();
        let key = rig.env().kernel.registry().root(PredefinedKey::CurrentUser).create("Mixed");
        key.create("Sub1");
        key.create("Sub2");
        key.set_value("", RegValueType::Sz, ntposix_native::registry::sz("default"));
        key.set_value("Val", RegValueType::Dword, 7u32.to_le_bytes());

        let fh = open(&rig, "/HKEY_CURRENT_USER/Mixed", O_RDONLY).unwrap();
        assert_eq!(fh.fstat().unwrap().file_type(), S_IFDIR);
        assert_eq!(fh.fstat().unwrap().st_nlink, 4);
        assert_eq!(fh.read(&mut [0u8; 4]), Err(Errno::EISDIR));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(fh.readdir().unwrap().unwrap().d_name);
        }
        assert_eq!(seen, [".", "..", "Sub1", "Sub2"]);
        let mid = fh.telldir().unwrap();
        let first_value = fh.readdir().unwrap().unwrap();
        assert_eq!(first_value.d_name, "@");
        assert_eq!(first_value.d_type, DT_REG);
        assert_ne!(fh.telldir().unwrap() & REG_ENUM_VALUES_MASK, 0);
        assert_eq!(fh.readdir().unwrap().unwrap().d_name, "Val");
        assert_eq!(fh.readdir().unwrap(), None);

        fh.seekdir(mid).unwrap();
        assert_eq!(names(&fh), ["@", "Val"]);
        fh.rewinddir().unwrap();
        assert_eq!(names(&fh).len(), 6);
    }

    #[test]
    fn attribute_changes_are_refused() {
        let rig = TestRig::new().build();
        let fh = open(&rig, "/HKEY_USERS", O_RDONLY).unwrap();
        assert_eq!(fh.fchmod(0o777), Err(Errno::EROFS));
        assert_eq!(fh.fchown(0, 0), Err(Errno::EPERM));
    }
}
