//! Kernel objects.
//!
//! Every handle in a process table refers to a [`KernelObject`]. The object
//! lives as long as any handle (in any process) refers to it; the body of a
//! pipe end, for example, detaches from its pipe when the last handle goes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::console::ConsoleDevice;
use crate::disk::DiskDriver;
use crate::msgqueue::MessageQueue;
use crate::namespace::NsDirectory;
use crate::pipe::PipeEnd;
use crate::pty::PtyEnd;
use crate::registry::RegKey;
use crate::section::PhysicalMemory;
use crate::serial::SerialPort;
use crate::status::NtStatus;
use crate::sync::{EventObject, MutexObject, SemaphoreObject, Waitable};
use crate::tape::TapeDriver;

/// Type tag of a kernel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pipe,
    Mutex,
    Semaphore,
    Event,
    Tape,
    Disk,
    Section,
    RegistryKey,
    Directory,
    Console,
    MessageQueue,
    Serial,
    Pty,
}

impl ObjectKind {
    /// The object-manager type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Pipe => "File",
            Self::Mutex => "Mutant",
            Self::Semaphore => "Semaphore",
            Self::Event => "Event",
            Self::Tape
            | Self::Disk
            | Self::Console
            | Self::MessageQueue
            | Self::Serial
            | Self::Pty => "File",
            Self::Section => "Section",
            Self::RegistryKey => "Key",
            Self::Directory => "Directory",
        }
    }
}

/// A disk opened either whole (`partition == 0`) or as one partition.
#[derive(Clone)]
pub struct DiskVolume {
    pub driver: Arc<dyn DiskDriver>,
    pub partition: u32,
}

impl fmt::Debug for DiskVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskVolume")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

/// Type-specific state of a kernel object.
pub enum ObjectBody {
    Pipe(PipeEnd),
    Mutex(MutexObject),
    Semaphore(SemaphoreObject),
    Event(EventObject),
    Tape(Arc<dyn TapeDriver>),
    Disk(DiskVolume),
    Section(Arc<PhysicalMemory>),
    RegistryKey(RegKey),
    Directory(Arc<NsDirectory>),
    Console(Arc<ConsoleDevice>),
    MessageQueue(Arc<MessageQueue>),
    Serial(Arc<SerialPort>),
    Pty(PtyEnd),
}

impl ObjectBody {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Pipe(_) => ObjectKind::Pipe,
            Self::Mutex(_) => ObjectKind::Mutex,
            Self::Semaphore(_) => ObjectKind::Semaphore,
            Self::Event(_) => ObjectKind::Event,
            Self::Tape(_) => ObjectKind::Tape,
            Self::Disk(_) => ObjectKind::Disk,
            Self::Section(_) => ObjectKind::Section,
            Self::RegistryKey(_) => ObjectKind::RegistryKey,
            Self::Directory(_) => ObjectKind::Directory,
            Self::Console(_) => ObjectKind::Console,
            Self::MessageQueue(_) => ObjectKind::MessageQueue,
            Self::Serial(_) => ObjectKind::Serial,
            Self::Pty(_) => ObjectKind::Pty,
        }
    }
}

/// A kernel object with its open-handle count.
pub struct KernelObject {
    name: Option<String>,
    handles: AtomicUsize,
    body: ObjectBody,
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelObject")
            .field("kind", &self.kind())
            .field("name", &self.name)
            .field("handles", &self.handle_count())
            .finish()
    }
}

impl KernelObject {
    #[must_use]
    pub fn new(name: Option<String>, body: ObjectBody) -> Arc<Self> {
        Arc::new(Self {
            name,
            handles: AtomicUsize::new(0),
            body,
        })
    }

    #[must_use]
    pub fn anonymous(body: ObjectBody) -> Arc<Self> {
        Self::new(None, body)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    #[must_use]
    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    /// Number of open handles across all processes.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    pub(crate) fn add_handle(&self) {
        self.handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn drop_handle(&self) {
        self.handles.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn as_pipe(&self) -> Result<&PipeEnd, NtStatus> {
        match &self.body {
            ObjectBody::Pipe(end) => Ok(end),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_mutex(&self) -> Result<&MutexObject, NtStatus> {
        match &self.body {
            ObjectBody::Mutex(m) => Ok(m),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_semaphore(&self) -> Result<&SemaphoreObject, NtStatus> {
        match &self.body {
            ObjectBody::Semaphore(s) => Ok(s),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_event(&self) -> Result<&EventObject, NtStatus> {
        match &self.body {
            ObjectBody::Event(e) => Ok(e),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_tape(&self) -> Result<&Arc<dyn TapeDriver>, NtStatus> {
        match &self.body {
            ObjectBody::Tape(t) => Ok(t),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_disk(&self) -> Result<&DiskVolume, NtStatus> {
        match &self.body {
            ObjectBody::Disk(d) => Ok(d),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_section(&self) -> Result<&Arc<PhysicalMemory>, NtStatus> {
        match &self.body {
            ObjectBody::Section(s) => Ok(s),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_registry_key(&self) -> Result<&RegKey, NtStatus> {
        match &self.body {
            ObjectBody::RegistryKey(k) => Ok(k),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_directory(&self) -> Result<&Arc<NsDirectory>, NtStatus> {
        match &self.body {
            ObjectBody::Directory(d) => Ok(d),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_console(&self) -> Result<&Arc<ConsoleDevice>, NtStatus> {
        match &self.body {
            ObjectBody::Console(c) => Ok(c),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_message_queue(&self) -> Result<&Arc<MessageQueue>, NtStatus> {
        match &self.body {
            ObjectBody::MessageQueue(q) => Ok(q),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_serial(&self) -> Result<&Arc<SerialPort>, NtStatus> {
        match &self.body {
            ObjectBody::Serial(s) => Ok(s),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    pub fn as_pty(&self) -> Result<&PtyEnd, NtStatus> {
        match &self.body {
            ObjectBody::Pty(end) => Ok(end),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }

    /// The object viewed as something a thread can wait on.
    pub fn as_waitable(&self) -> Result<&dyn Waitable, NtStatus> {
        match &self.body {
            ObjectBody::Mutex(m) => Ok(m),
            ObjectBody::Semaphore(s) => Ok(s),
            ObjectBody::Event(e) => Ok(e),
            _ => Err(NtStatus::OBJECT_TYPE_MISMATCH),
        }
    }
}
