//! The registry hive.
//!
//! Keys and value names compare case-insensitively and enumerate in
//! creation order. The default value of a key has the empty name. Values
//! flagged volatile (the performance-data counters) change size between
//! calls, so their size query deliberately under-reports and callers have to
//! grow their buffer on `MORE_DATA`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::status::WinError;

/// The predefined top-level keys, in the order they are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedKey {
    ClassesRoot,
    CurrentConfig,
    CurrentUser,
    LocalMachine,
    Users,
    PerformanceData,
}

impl PredefinedKey {
    pub const ALL: [Self; 6] = [
        Self::ClassesRoot,
        Self::CurrentConfig,
        Self::CurrentUser,
        Self::LocalMachine,
        Self::Users,
        Self::PerformanceData,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClassesRoot => "HKEY_CLASSES_ROOT",
            Self::CurrentConfig => "HKEY_CURRENT_CONFIG",
            Self::CurrentUser => "HKEY_CURRENT_USER",
            Self::LocalMachine => "HKEY_LOCAL_MACHINE",
            Self::Users => "HKEY_USERS",
            Self::PerformanceData => "HKEY_PERFORMANCE_DATA",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

/// `REG_*` value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RegValueType {
    None = 0,
    Sz = 1,
    ExpandSz = 2,
    Binary = 3,
    Dword = 4,
    DwordBigEndian = 5,
    Link = 6,
    MultiSz = 7,
    Qword = 11,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegValue {
    pub kind: RegValueType,
    pub data: Vec<u8>,
    pub volatile: bool,
}

/// Counts returned by [`RegKey::query_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyInfo {
    pub subkeys: usize,
    pub values: usize,
    pub max_value_len: usize,
}

struct KeyNode {
    name: String,
    subkeys: RwLock<Vec<Arc<KeyNode>>>,
    values: RwLock<Vec<(String, RegValue)>>,
    deny_read: AtomicBool,
}

impl KeyNode {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            subkeys: RwLock::new(Vec::new()),
            values: RwLock::new(Vec::new()),
            deny_read: AtomicBool::new(false),
        })
    }

    fn child(&self, name: &str) -> Option<Arc<Self>> {
        self.subkeys
            .read()
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// An open registry key.
#[derive(Clone)]
pub struct RegKey(Arc<KeyNode>);

impl fmt::Debug for RegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegKey").field(&self.0.name).finish()
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(['\\', '/']).filter(|c| !c.is_empty())
}

impl RegKey {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Open the key at `path` below this one. Keys whose read access is
    /// denied can be listed by their parent but not opened.
    pub fn open(&self, path: &str) -> Result<RegKey, WinError> {
        let mut node = Arc::clone(&self.0);
        for part in components(path) {
            node = node.child(part).ok_or(WinError::FILE_NOT_FOUND)?;
        }
        if node.deny_read.load(Ordering::Acquire) {
            return Err(WinError::ACCESS_DENIED);
        }
        Ok(RegKey(node))
    }

    /// Open or create every key along `path`.
    pub fn create(&self, path: &str) -> RegKey {
        let mut node = Arc::clone(&self.0);
        for part in components(path) {
            let next = match node.child(part) {
                Some(existing) => existing,
                None => {
                    let created = KeyNode::new(part);
                    node.subkeys.write().push(Arc::clone(&created));
                    created
                }
            };
            node = next;
        }
        RegKey(node)
    }

    pub fn set_value(&self, name: &str, kind: RegValueType, data: impl Into<Vec<u8>>) {
        self.store(
            name,
            RegValue {
                kind,
                data: data.into(),
                volatile: false,
            },
        );
    }

    /// Store a value whose size query under-reports.
    pub fn set_volatile_value(&self, name: &str, kind: RegValueType, data: impl Into<Vec<u8>>) {
        self.store(
            name,
            RegValue {
                kind,
                data: data.into(),
                volatile: true,
            },
        );
    }

    fn store(&self, name: &str, value: RegValue) {
        let mut values = self.0.values.write();
        match values
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, slot)) => *slot = value,
            None => values.push((name.to_owned(), value)),
        }
    }

    pub fn delete_value(&self, name: &str) -> Result<(), WinError> {
        let mut values = self.0.values.write();
        let before = values.len();
        values.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        if values.len() == before {
            return Err(WinError::FILE_NOT_FOUND);
        }
        Ok(())
    }

    /// Deny (or restore) read access to this key.
    pub fn set_read_denied(&self, denied: bool) {
        self.0.deny_read.store(denied, Ordering::Release);
    }

    /// `RegEnumKeyEx`: name of the `index`th subkey.
    pub fn enum_key(&self, index: usize) -> Result<String, WinError> {
        self.0
            .subkeys
            .read()
            .get(index)
            .map(|k| k.name.clone())
            .ok_or(WinError::NO_MORE_ITEMS)
    }

    /// `RegEnumValue`: name and type of the `index`th value.
    pub fn enum_value(&self, index: usize) -> Result<(String, RegValueType), WinError> {
        self.0
            .values
            .read()
            .get(index)
            .map(|(n, v)| (n.clone(), v.kind))
            .ok_or(WinError::NO_MORE_ITEMS)
    }

    /// `RegQueryValueEx`.
    ///
    /// Without a buffer, reports the type and size. With one, copies the
    /// data and reports its length, or fails with `MORE_DATA` when it does
    /// not fit.
    pub fn query_value(
        &self,
        name: &str,
        buf: Option<&mut [u8]>,
    ) -> Result<(RegValueType, usize), WinError> {
        let values = self.0.values.read();
        let (_, value) = values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .ok_or(WinError::FILE_NOT_FOUND)?;
        match buf {
            None => {
                let reported = if value.volatile {
                    value.data.len() / 2
                } else {
                    value.data.len()
                };
                Ok((value.kind, reported))
            }
            Some(buf) if buf.len() < value.data.len() => Err(WinError::MORE_DATA),
            Some(buf) => {
                buf[..value.data.len()].copy_from_slice(&value.data);
                Ok((value.kind, value.data.len()))
            }
        }
    }

    #[must_use]
    pub fn query_info(&self) -> KeyInfo {
        let values = self.0.values.read();
        KeyInfo {
            subkeys: self.0.subkeys.read().len(),
            values: values.len(),
            max_value_len: values.iter().map(|(_, v)| v.data.len()).max().unwrap_or(0),
        }
    }

    /// Two handles refer to the same key.
    #[must_use]
    pub fn same_key(&self, other: &RegKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The whole hive: one root per predefined key.
#[derive(Debug)]
pub struct Registry {
    roots: Vec<(PredefinedKey, RegKey)>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: PredefinedKey::ALL
                .into_iter()
                .map(|k| (k, RegKey(KeyNode::new(k.name()))))
                .collect(),
        }
    }

    #[must_use]
    pub fn root(&self, key: PredefinedKey) -> RegKey {
        self.roots
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| RegKey(KeyNode::new(key.name())))
    }

    /// A hive with the keys a fresh installation carries.
    #[must_use]
    pub fn populated() -> Self {
        let reg = Self::new();
        let version = reg
            .root(PredefinedKey::LocalMachine)
            .create("SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion");
        version.set_value("", RegValueType::Sz, sz("Windows NT"));
        version.set_value("ProductName", RegValueType::Sz, sz("ntposix simulated kernel"));
        version.set_value("CurrentBuildNumber", RegValueType::Sz, sz("19045"));
        version.set_value("InstallDate", RegValueType::Dword, 1_600_000_000u32.to_le_bytes());
        reg.root(PredefinedKey::LocalMachine)
            .create("SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Environment")
            .set_value("OS", RegValueType::Sz, sz("Windows_NT"));
        let sam = reg.root(PredefinedKey::LocalMachine).create("SAM");
        sam.set_read_denied(true);

        let env = reg.root(PredefinedKey::CurrentUser).create("Environment");
        env.set_value("TEMP", RegValueType::ExpandSz, sz("%USERPROFILE%\\AppData\\Local\\Temp"));
        env.set_value("PATH", RegValueType::ExpandSz, sz("%USERPROFILE%\\bin"));
        reg.root(PredefinedKey::CurrentUser).create("Software");

        reg.root(PredefinedKey::ClassesRoot)
            .create(".txt")
            .set_value("", RegValueType::Sz, sz("txtfile"));
        reg.root(PredefinedKey::Users).create(".DEFAULT");
        reg.root(PredefinedKey::CurrentConfig).create("System");

        let perf = reg.root(PredefinedKey::PerformanceData);
        let counters: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        perf.set_volatile_value("Global", RegValueType::Binary, counters.clone());
        perf.set_volatile_value("Costly", RegValueType::Binary, counters[..2500].to_vec());
        reg
    }
}

/// `REG_SZ` payload: UTF-16LE with a terminating NUL.
#[must_use]
pub fn sz(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}
