//! The object-manager namespace.
//!
//! A tree of object directories rooted at `\`. Leaves are symbolic links,
//! device objects and assorted named objects. Lookups never follow symbolic
//! links; resolving a link is the caller's business.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::status::NtStatus;

/// Device type of a `Device` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Disk,
    NamedPipe,
    Tape,
    Null,
    Console,
    Memory,
    Serial,
    Other,
}

/// One namespace entry.
#[derive(Clone)]
pub enum NsEntry {
    Directory(Arc<NsDirectory>),
    SymbolicLink(String),
    Device(DeviceType),
    /// Any other named object, tagged with its type name.
    Object(&'static str),
}

impl fmt::Debug for NsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(d) => f.debug_tuple("Directory").field(&d.name).finish(),
            Self::SymbolicLink(t) => f.debug_tuple("SymbolicLink").field(t).finish(),
            Self::Device(t) => f.debug_tuple("Device").field(t).finish(),
            Self::Object(t) => f.debug_tuple("Object").field(t).finish(),
        }
    }
}

impl NsEntry {
    /// Object-manager type name, as `NtQueryDirectoryObject` reports it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Directory(_) => "Directory",
            Self::SymbolicLink(_) => "SymbolicLink",
            Self::Device(_) => "Device",
            Self::Object(t) => t,
        }
    }
}

/// Result of one `NtQueryDirectoryObject` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub type_name: &'static str,
}

/// An object directory.
pub struct NsDirectory {
    name: String,
    entries: RwLock<Vec<(String, NsEntry)>>,
    protected: AtomicBool,
}

impl fmt::Debug for NsDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsDirectory")
            .field("name", &self.name)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl NsDirectory {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            entries: RwLock::new(Vec::new()),
            protected: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entry(&self, name: &str) -> Option<NsEntry> {
        self.entries
            .read()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, e)| e.clone())
    }

    /// The `index`th entry, `NO_MORE_ENTRIES` past the end.
    pub fn query_directory(&self, index: usize) -> Result<DirEntryInfo, NtStatus> {
        self.entries
            .read()
            .get(index)
            .map(|(name, e)| DirEntryInfo {
                name: name.clone(),
                type_name: e.type_name(),
            })
            .ok_or(NtStatus::NO_MORE_ENTRIES)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A protected directory can be seen in its parent but not opened.
    pub fn set_protected(&self, protected: bool) {
        self.protected.store(protected, Ordering::Release);
    }

    fn subdirectory(self: &Arc<Self>, name: &str) -> Result<Arc<Self>, NtStatus> {
        let mut entries = self.entries.write();
        if let Some((_, entry)) = entries.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            return match entry {
                NsEntry::Directory(d) => Ok(Arc::clone(d)),
                _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
            };
        }
        let dir = Self::new(name);
        entries.push((name.to_owned(), NsEntry::Directory(Arc::clone(&dir))));
        Ok(dir)
    }
}

fn split(path: &str) -> Result<Vec<&str>, NtStatus> {
    if !path.starts_with('\\') {
        return Err(NtStatus::OBJECT_NAME_INVALID);
    }
    Ok(path.split('\\').filter(|c| !c.is_empty()).collect())
}

/// The namespace root.
#[derive(Debug)]
pub struct ObjectNamespace {
    root: Arc<NsDirectory>,
}

impl Default for ObjectNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectNamespace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: NsDirectory::new(""),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Arc<NsDirectory> {
        &self.root
    }

    /// Register `entry` at the absolute `path`, creating directories on the way.
    pub fn insert(&self, path: &str, entry: NsEntry) -> Result<(), NtStatus> {
        let parts = split(path)?;
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(NtStatus::OBJECT_NAME_INVALID);
        };
        let mut dir = Arc::clone(&self.root);
        for part in dirs {
            dir = dir.subdirectory(part)?;
        }
        let mut entries = dir.entries.write();
        if entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(leaf)) {
            return Err(NtStatus::OBJECT_NAME_COLLISION);
        }
        entries.push(((*leaf).to_owned(), entry));
        Ok(())
    }

    /// Make (or fetch) the directory at `path`.
    pub fn mkdir(&self, path: &str) -> Result<Arc<NsDirectory>, NtStatus> {
        let mut dir = Arc::clone(&self.root);
        for part in split(path)? {
            dir = dir.subdirectory(part)?;
        }
        Ok(dir)
    }

    /// Find the entry at `path` without following links.
    pub fn lookup(&self, path: &str) -> Result<NsEntry, NtStatus> {
        let parts = split(path)?;
        let mut current = NsEntry::Directory(Arc::clone(&self.root));
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.iter().enumerate() {
            let NsEntry::Directory(dir) = &current else {
                return Err(NtStatus::OBJECT_PATH_NOT_FOUND);
            };
            current = match dir.entry(part) {
                Some(entry) => entry,
                None if i == last => return Err(NtStatus::OBJECT_NAME_NOT_FOUND),
                None => return Err(NtStatus::OBJECT_PATH_NOT_FOUND),
            };
        }
        Ok(current)
    }

    /// `NtOpenDirectoryObject`.
    pub fn open_directory(&self, path: &str) -> Result<Arc<NsDirectory>, NtStatus> {
        match self.lookup(path)? {
            NsEntry::Directory(dir) if dir.protected.load(Ordering::Acquire) => {
                Err(NtStatus::ACCESS_DENIED)
            }
            NsEntry::Directory(dir) => Ok(dir),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    /// `NtQuerySymbolicLinkObject`.
    pub fn query_symlink(&self, path: &str) -> Result<String, NtStatus> {
        match self.lookup(path)? {
            NsEntry::SymbolicLink(target) => Ok(target),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectNamespace {
        let ns = ObjectNamespace::new();
        ns.insert("\\Device\\Tape0", NsEntry::Device(DeviceType::Tape)).unwrap();
        ns.insert("\\Device\\NamedPipe", NsEntry::Device(DeviceType::NamedPipe)).unwrap();
        ns.insert("\\GLOBAL??\\TAPE0", NsEntry::SymbolicLink("\\Device\\Tape0".into()))
            .unwrap();
        ns
    }

    #[test]
    fn lookup_distinguishes_path_and_name() {
        let ns = sample();
        assert!(matches!(ns.lookup("\\Device\\Tape0"), Ok(NsEntry::Device(DeviceType::Tape))));
        assert_eq!(
            ns.lookup("\\Device\\Nope").unwrap_err(),
            NtStatus::OBJECT_NAME_NOT_FOUND
        );
        assert_eq!(
            ns.lookup("\\Nope\\Tape0").unwrap_err(),
            NtStatus::OBJECT_PATH_NOT_FOUND
        );
        assert_eq!(ns.lookup("Device").unwrap_err(), NtStatus::OBJECT_NAME_INVALID);
    }

    #[test]
    fn enumerates_then_reports_no_more_entries() {
        let ns = sample();
        let dev = ns.open_directory("\\Device").unwrap();
        assert_eq!(dev.query_directory(0).unwrap().name, "Tape0");
        assert_eq!(dev.query_directory(1).unwrap().type_name, "Device");
        assert_eq!(dev.query_directory(2).unwrap_err(), NtStatus::NO_MORE_ENTRIES);
    }

    #[test]
    fn symlink_target_and_protection() {
        let ns = sample();
        assert_eq!(ns.query_symlink("\\GLOBAL??\\TAPE0").unwrap(), "\\Device\\Tape0");
        ns.mkdir("\\Security").unwrap().set_protected(true);
        assert_eq!(ns.open_directory("\\Security").unwrap_err(), NtStatus::ACCESS_DENIED);
        assert!(ns.lookup("\\Security").is_ok());
    }

    #[test]
    fn duplicate_insert_collides() {
        let ns = sample();
        assert_eq!(
            ns.insert("\\Device\\Tape0", NsEntry::Object("Event")),
            Err(NtStatus::OBJECT_NAME_COLLISION)
        );
    }
}
