//! Per-process handle tables.
//!
//! Handle values are allocated in steps of four, like the real thing, and a
//! table entry carries the inheritance flag consulted when a child process is
//! created. Entries copied into a child start out *unclaimed*; the child's
//! descriptor layer claims the ones it knows about and closes the rest.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::object::KernelObject;
use crate::status::NtStatus;

/// A handle value, meaningful only within one process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

const HANDLE_STEP: u64 = 4;

struct HandleEntry {
    object: Arc<KernelObject>,
    inherit: bool,
    claimed: bool,
}

/// A process as far as handles are concerned.
pub struct Process {
    pid: u32,
    ppid: u32,
    table: Mutex<HashMap<RawHandle, HandleEntry>>,
    next: AtomicU64,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("ppid", &self.ppid)
            .field("handles", &self.handle_count())
            .finish()
    }
}

impl Process {
    pub(crate) fn new(pid: u32, ppid: u32) -> Self {
        Self {
            pid,
            ppid,
            table: Mutex::new(HashMap::new()),
            next: AtomicU64::new(HANDLE_STEP),
        }
    }

    /// Build a child whose table holds every inheritable entry of `parent`
    /// under the same handle values.
    pub(crate) fn inherit_from(parent: &Self, pid: u32) -> Self {
        let child = Self::new(pid, parent.pid);
        child
            .next
            .store(parent.next.load(Ordering::Acquire), Ordering::Release);
        let parent_table = parent.table.lock();
        let mut table = child.table.lock();
        for (raw, entry) in parent_table.iter().filter(|(_, e)| e.inherit) {
            entry.object.add_handle();
            table.insert(
                *raw,
                HandleEntry {
                    object: Arc::clone(&entry.object),
                    inherit: true,
                    claimed: false,
                },
            );
        }
        drop(table);
        child
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn ppid(&self) -> u32 {
        self.ppid
    }

    fn allocate(&self) -> RawHandle {
        RawHandle(self.next.fetch_add(HANDLE_STEP, Ordering::AcqRel))
    }

    /// Enter `object` into the table.
    pub fn insert(&self, object: Arc<KernelObject>, inherit: bool) -> RawHandle {
        let raw = self.allocate();
        object.add_handle();
        self.table.lock().insert(
            raw,
            HandleEntry {
                object,
                inherit,
                claimed: true,
            },
        );
        raw
    }

    pub fn object(&self, raw: RawHandle) -> Result<Arc<KernelObject>, NtStatus> {
        self.table
            .lock()
            .get(&raw)
            .map(|e| Arc::clone(&e.object))
            .ok_or(NtStatus::INVALID_HANDLE)
    }

    pub fn close(&self, raw: RawHandle) -> Result<(), NtStatus> {
        let entry = self
            .table
            .lock()
            .remove(&raw)
            .ok_or(NtStatus::INVALID_HANDLE)?;
        entry.object.drop_handle();
        log::trace!(
            "pid {}: closed handle {raw} ({:?}, {} left)",
            self.pid,
            entry.object.kind(),
            entry.object.handle_count()
        );
        Ok(())
    }

    pub fn set_inherit(&self, raw: RawHandle, inherit: bool) -> Result<(), NtStatus> {
        let mut table = self.table.lock();
        let entry = table.get_mut(&raw).ok_or(NtStatus::INVALID_HANDLE)?;
        entry.inherit = inherit;
        Ok(())
    }

    pub fn is_inheritable(&self, raw: RawHandle) -> Result<bool, NtStatus> {
        self.table
            .lock()
            .get(&raw)
            .map(|e| e.inherit)
            .ok_or(NtStatus::INVALID_HANDLE)
    }

    /// `DuplicateHandle` from this process into `target`.
    pub fn duplicate_into(
        &self,
        raw: RawHandle,
        target: &Self,
        inherit: bool,
    ) -> Result<RawHandle, NtStatus> {
        let object = self.object(raw)?;
        Ok(target.insert(object, inherit))
    }

    /// Mark an inherited entry as owned by the caller.
    pub fn claim(&self, raw: RawHandle) -> Result<Arc<KernelObject>, NtStatus> {
        let mut table = self.table.lock();
        let entry = table.get_mut(&raw).ok_or(NtStatus::INVALID_HANDLE)?;
        if entry.claimed {
            return Err(NtStatus::INVALID_HANDLE);
        }
        entry.claimed = true;
        Ok(Arc::clone(&entry.object))
    }

    /// Close every inherited entry nobody claimed. Returns how many closed.
    pub fn release_unclaimed(&self) -> usize {
        let unclaimed: Vec<RawHandle> = self
            .table
            .lock()
            .iter()
            .filter(|(_, e)| !e.claimed)
            .map(|(raw, _)| *raw)
            .collect();
        for raw in &unclaimed {
            let _ = self.close(*raw);
        }
        unclaimed.len()
    }

    /// Number of entries in the table.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Close everything; used at process exit.
    pub fn close_all(&self) {
        let entries: Vec<HandleEntry> = self.table.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.object.drop_handle();
        }
    }
}

// ---------------------------------------------------------------------------
// Owned handles
// ---------------------------------------------------------------------------

/// A handle that closes itself when dropped.
pub struct OwnedHandle {
    process: Arc<Process>,
    raw: RawHandle,
    object: Arc<KernelObject>,
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("pid", &self.process.pid)
            .field("raw", &self.raw)
            .field("kind", &self.object.kind())
            .finish()
    }
}

impl OwnedHandle {
    /// Enter `object` into `process` and own the resulting handle.
    #[must_use]
    pub fn new(process: &Arc<Process>, object: Arc<KernelObject>, inherit: bool) -> Self {
        let raw = process.insert(Arc::clone(&object), inherit);
        Self {
            process: Arc::clone(process),
            raw,
            object,
        }
    }

    /// Take ownership of an entry that `process` inherited at creation.
    pub fn adopt(process: &Arc<Process>, raw: RawHandle) -> Result<Self, NtStatus> {
        let object = process.claim(raw)?;
        Ok(Self {
            process: Arc::clone(process),
            raw,
            object,
        })
    }

    /// Duplicate `raw` out of `source` into `target`.
    pub fn duplicate_from(
        source: &Process,
        raw: RawHandle,
        target: &Arc<Process>,
        inherit: bool,
    ) -> Result<Self, NtStatus> {
        let object = source.object(raw)?;
        Ok(Self::new(target, object, inherit))
    }

    #[must_use]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    #[must_use]
    pub fn object(&self) -> &Arc<KernelObject> {
        &self.object
    }

    #[must_use]
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Duplicate within the owning process.
    #[must_use]
    pub fn duplicate(&self, inherit: bool) -> Self {
        Self::new(&self.process, Arc::clone(&self.object), inherit)
    }

    pub fn set_inherit(&self, inherit: bool) -> Result<(), NtStatus> {
        self.process.set_inherit(self.raw, inherit)
    }

    pub fn is_inheritable(&self) -> Result<bool, NtStatus> {
        self.process.is_inheritable(self.raw)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        let _ = self.process.close(self.raw);
    }
}
