//! The kernel: process table, named objects and the attached devices.
//!
//! Every `open_*`/`create_*` call enters the new object into the given
//! process's handle table and hands back an [`OwnedHandle`]. Named mutexes,
//! semaphores and events follow the create-or-open rule: creating a name
//! that is still alive opens the existing object, provided the types match.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::console::ConsoleDevice;
use crate::disk::{DiskDriver, SimDisk};
use crate::msgqueue::MessageQueue;
use crate::namespace::{DeviceType, NsEntry, ObjectNamespace};
use crate::object::{DiskVolume, KernelObject, ObjectBody, ObjectKind};
use crate::pipe::{PipeShared, PipeSide};
use crate::process::{OwnedHandle, Process};
use crate::pty::{Pty, PtySide};
use crate::registry::{PredefinedKey, Registry};
use crate::section::PhysicalMemory;
use crate::serial::SerialPort;
use crate::status::{NtStatus, WinError};
use crate::sync::{EventObject, MutexObject, SemaphoreObject};
use crate::tape::{SimTape, TapeDriver};

/// Name of the physical memory section.
pub const PHYSICAL_MEMORY: &str = "\\Device\\PhysicalMemory";

const FIRST_PID: u32 = 1000;

/// The simulated machine.
pub struct Kernel {
    processes: Mutex<HashMap<u32, Arc<Process>>>,
    next_pid: AtomicU32,
    next_object_id: AtomicU64,
    named: Mutex<HashMap<String, Weak<KernelObject>>>,
    pipes: Mutex<HashMap<String, Weak<PipeShared>>>,
    fifos: Mutex<HashMap<String, Arc<PipeShared>>>,
    tapes: Vec<Arc<dyn TapeDriver>>,
    disks: Vec<Arc<dyn DiskDriver>>,
    floppies: Vec<Arc<dyn DiskDriver>>,
    serials: Vec<Arc<SerialPort>>,
    /// The open object of each serial port; ports are exclusive.
    serial_objects: Mutex<HashMap<usize, Weak<KernelObject>>>,
    ptys: Mutex<Vec<Weak<Pty>>>,
    memory: Arc<PhysicalMemory>,
    registry: Registry,
    namespace: ObjectNamespace,
    console: Arc<ConsoleDevice>,
    messages: Arc<MessageQueue>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("processes", &self.processes.lock().len())
            .field("tapes", &self.tapes.len())
            .field("disks", &self.disks.len())
            .field("floppies", &self.floppies.len())
            .field("serials", &self.serials.len())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    #[must_use]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------------

    /// Start a process with an empty handle table.
    pub fn spawn_process(&self, ppid: u32) -> Arc<Process> {
        let pid = self.next_pid.fetch_add(1, Ordering::AcqRel);
        let process = Arc::new(Process::new(pid, ppid));
        self.processes.lock().insert(pid, Arc::clone(&process));
        log::debug!("kernel: spawned pid {pid} (parent {ppid})");
        process
    }

    /// Start a child whose table holds the parent's inheritable handles.
    pub fn fork_process(&self, parent: &Process) -> Arc<Process> {
        let pid = self.next_pid.fetch_add(1, Ordering::AcqRel);
        let child = Arc::new(Process::inherit_from(parent, pid));
        self.processes.lock().insert(pid, Arc::clone(&child));
        log::debug!(
            "kernel: forked pid {pid} from {} with {} inherited handles",
            parent.pid(),
            child.handle_count()
        );
        child
    }

    /// Tear down `pid`, closing whatever it still holds.
    pub fn exit_process(&self, pid: u32) {
        if let Some(process) = self.processes.lock().remove(&pid) {
            process.close_all();
        }
    }

    #[must_use]
    pub fn process(&self, pid: u32) -> Option<Arc<Process>> {
        self.processes.lock().get(&pid).cloned()
    }

    /// A fresh id for naming pipes and similar objects.
    pub fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::AcqRel)
    }

    // -----------------------------------------------------------------------
    // Pipes and FIFOs
    // -----------------------------------------------------------------------

    /// `CreateNamedPipe` plus the client open: both ends of a new pipe.
    pub fn create_pipe(
        &self,
        process: &Arc<Process>,
        name: &str,
        capacity: usize,
        inherit: bool,
    ) -> Result<(OwnedHandle, OwnedHandle), NtStatus> {
        let mut pipes = self.pipes.lock();
        if pipes.get(name).is_some_and(|w| w.strong_count() > 0) {
            return Err(NtStatus::PIPE_BUSY);
        }
        let id = self.next_object_id();
        let (read, write) = PipeShared::create_pair(id, name, capacity);
        pipes.insert(name.to_owned(), Arc::downgrade(read.shared()));
        drop(pipes);
        let r = KernelObject::new(Some(name.to_owned()), ObjectBody::Pipe(read));
        let w = KernelObject::new(Some(name.to_owned()), ObjectBody::Pipe(write));
        Ok((
            OwnedHandle::new(process, r, inherit),
            OwnedHandle::new(process, w, inherit),
        ))
    }

    /// Register a FIFO at `path`.
    pub fn create_fifo(&self, path: &str, capacity: usize) -> Result<(), NtStatus> {
        let mut fifos = self.fifos.lock();
        if fifos.contains_key(path) {
            return Err(NtStatus::OBJECT_NAME_COLLISION);
        }
        let name = format!("\\\\.\\pipe\\fifo-{}", self.next_object_id());
        let id = self.next_object_id();
        fifos.insert(path.to_owned(), PipeShared::new(id, name, capacity));
        Ok(())
    }

    #[must_use]
    pub fn fifo(&self, path: &str) -> Option<Arc<PipeShared>> {
        self.fifos.lock().get(path).cloned()
    }

    /// Attach a new end to the FIFO at `path`.
    pub fn open_fifo(
        &self,
        process: &Arc<Process>,
        path: &str,
        side: PipeSide,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        let shared = self.fifo(path).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
        let end = shared.attach(side);
        let object = KernelObject::new(Some(shared.name().to_owned()), ObjectBody::Pipe(end));
        Ok(OwnedHandle::new(process, object, inherit))
    }

    pub fn remove_fifo(&self, path: &str) -> Result<(), NtStatus> {
        self.fifos
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)
    }

    // -----------------------------------------------------------------------
    // Named synchronization objects
    // -----------------------------------------------------------------------

    fn create_named(
        &self,
        process: &Arc<Process>,
        name: Option<&str>,
        kind: ObjectKind,
        inherit: bool,
        body: impl FnOnce() -> ObjectBody,
    ) -> Result<OwnedHandle, NtStatus> {
        let Some(name) = name else {
            return Ok(OwnedHandle::new(process, KernelObject::anonymous(body()), inherit));
        };
        let mut named = self.named.lock();
        if let Some(existing) = named.get(name).and_then(Weak::upgrade) {
            if existing.kind() != kind {
                return Err(NtStatus::OBJECT_TYPE_MISMATCH);
            }
            return Ok(OwnedHandle::new(process, existing, inherit));
        }
        let object = KernelObject::new(Some(name.to_owned()), body());
        named.insert(name.to_owned(), Arc::downgrade(&object));
        Ok(OwnedHandle::new(process, object, inherit))
    }

    pub fn create_mutex(
        &self,
        process: &Arc<Process>,
        name: Option<&str>,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        self.create_named(process, name, ObjectKind::Mutex, inherit, || {
            ObjectBody::Mutex(MutexObject::new())
        })
    }

    pub fn create_semaphore(
        &self,
        process: &Arc<Process>,
        name: Option<&str>,
        initial: u32,
        maximum: u32,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        self.create_named(process, name, ObjectKind::Semaphore, inherit, || {
            ObjectBody::Semaphore(SemaphoreObject::new(initial, maximum))
        })
    }

    pub fn create_event(
        &self,
        process: &Arc<Process>,
        name: Option<&str>,
        manual_reset: bool,
        initial: bool,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        self.create_named(process, name, ObjectKind::Event, inherit, || {
            ObjectBody::Event(EventObject::new(manual_reset, initial))
        })
    }

    /// Open an existing named object.
    pub fn open_named(
        &self,
        process: &Arc<Process>,
        name: &str,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        let object = self
            .named
            .lock()
            .get(name)
            .and_then(Weak::upgrade)
            .ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
        Ok(OwnedHandle::new(process, object, inherit))
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn tape(&self, unit: usize) -> Option<&Arc<dyn TapeDriver>> {
        self.tapes.get(unit)
    }

    #[must_use]
    pub fn disk(&self, unit: usize) -> Option<&Arc<dyn DiskDriver>> {
        self.disks.get(unit)
    }

    #[must_use]
    pub fn floppy(&self, unit: usize) -> Option<&Arc<dyn DiskDriver>> {
        self.floppies.get(unit)
    }

    #[must_use]
    pub fn tape_count(&self) -> usize {
        self.tapes.len()
    }

    #[must_use]
    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    #[must_use]
    pub fn floppy_count(&self) -> usize {
        self.floppies.len()
    }

    pub fn open_tape(
        &self,
        process: &Arc<Process>,
        unit: usize,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let driver = self.tapes.get(unit).ok_or(WinError::FILE_NOT_FOUND)?;
        let object = KernelObject::new(
            Some(format!("\\Device\\Tape{unit}")),
            ObjectBody::Tape(Arc::clone(driver)),
        );
        Ok(OwnedHandle::new(process, object, inherit))
    }

    /// Open hard disk `unit`, whole (`partition == 0`) or one partition.
    pub fn open_disk(
        &self,
        process: &Arc<Process>,
        unit: usize,
        partition: u32,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let driver = self.disks.get(unit).ok_or(WinError::FILE_NOT_FOUND)?;
        if partition != 0 && !driver.partitions().iter().any(|p| p.number == partition) {
            return Err(WinError::FILE_NOT_FOUND);
        }
        let object = KernelObject::new(
            Some(format!("\\Device\\Harddisk{unit}\\Partition{partition}")),
            ObjectBody::Disk(DiskVolume {
                driver: Arc::clone(driver),
                partition,
            }),
        );
        Ok(OwnedHandle::new(process, object, inherit))
    }

    pub fn open_floppy(
        &self,
        process: &Arc<Process>,
        unit: usize,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let driver = self.floppies.get(unit).ok_or(WinError::FILE_NOT_FOUND)?;
        let object = KernelObject::new(
            Some(format!("\\Device\\Floppy{unit}")),
            ObjectBody::Disk(DiskVolume {
                driver: Arc::clone(driver),
                partition: 0,
            }),
        );
        Ok(OwnedHandle::new(process, object, inherit))
    }

    #[must_use]
    pub fn serial(&self, unit: usize) -> Option<&Arc<SerialPort>> {
        self.serials.get(unit)
    }

    #[must_use]
    pub fn serial_count(&self) -> usize {
        self.serials.len()
    }

    /// Open `COM<unit + 1>`. A port already open in any process is refused
    /// until every handle to it is closed.
    pub fn open_serial(
        &self,
        process: &Arc<Process>,
        unit: usize,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let port = self.serials.get(unit).ok_or(WinError::FILE_NOT_FOUND)?;
        let mut open = self.serial_objects.lock();
        if open.get(&unit).and_then(Weak::upgrade).is_some_and(|o| o.handle_count() > 0) {
            return Err(WinError::ACCESS_DENIED);
        }
        let object = KernelObject::new(
            Some(format!("\\Device\\Serial{unit}")),
            ObjectBody::Serial(Arc::clone(port)),
        );
        open.insert(unit, Arc::downgrade(&object));
        Ok(OwnedHandle::new(process, object, inherit))
    }

    // -----------------------------------------------------------------------
    // Pseudo-terminals
    // -----------------------------------------------------------------------

    /// Allocate the lowest free pty and open its master side.
    pub fn create_pty(&self, process: &Arc<Process>, inherit: bool) -> (Arc<Pty>, OwnedHandle) {
        let mut ptys = self.ptys.lock();
        let index = ptys
            .iter()
            .position(|w| w.strong_count() == 0)
            .unwrap_or(ptys.len());
        let pty = Pty::new(u32::try_from(index).unwrap_or(u32::MAX));
        if index == ptys.len() {
            ptys.push(Arc::downgrade(&pty));
        } else {
            ptys[index] = Arc::downgrade(&pty);
        }
        drop(ptys);
        let end = pty.attach(PtySide::Master);
        let object = KernelObject::new(Some(format!("\\Device\\Pty{index}")), ObjectBody::Pty(end));
        log::debug!("kernel: allocated pty {index}");
        (pty, OwnedHandle::new(process, object, inherit))
    }

    #[must_use]
    pub fn pty(&self, index: u32) -> Option<Arc<Pty>> {
        let i = usize::try_from(index).ok()?;
        self.ptys.lock().get(i).and_then(Weak::upgrade)
    }

    /// Open a slave side of pty `index`. Refused once its master is gone.
    pub fn open_pty_slave(
        &self,
        process: &Arc<Process>,
        index: u32,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let pty = self.pty(index).ok_or(WinError::FILE_NOT_FOUND)?;
        if !pty.master_open() {
            return Err(WinError::IO_DEVICE);
        }
        let end = pty.attach(PtySide::Slave);
        let object = KernelObject::new(Some(format!("\\Device\\Pty{index}")), ObjectBody::Pty(end));
        Ok(OwnedHandle::new(process, object, inherit))
    }

    /// `NtOpenSection` on [`PHYSICAL_MEMORY`].
    pub fn open_physical_memory(
        &self,
        process: &Arc<Process>,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        let object = KernelObject::new(
            Some(PHYSICAL_MEMORY.to_owned()),
            ObjectBody::Section(Arc::clone(&self.memory)),
        );
        Ok(OwnedHandle::new(process, object, inherit))
    }

    #[must_use]
    pub fn physical_memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `RegOpenKeyEx` below a predefined key.
    pub fn open_registry_key(
        &self,
        process: &Arc<Process>,
        root: PredefinedKey,
        path: &str,
        inherit: bool,
    ) -> Result<OwnedHandle, WinError> {
        let key = self.registry.root(root).open(path)?;
        let object = KernelObject::new(
            Some(format!("{}\\{path}", root.name())),
            ObjectBody::RegistryKey(key),
        );
        Ok(OwnedHandle::new(process, object, inherit))
    }

    #[must_use]
    pub fn namespace(&self) -> &ObjectNamespace {
        &self.namespace
    }

    /// `NtOpenDirectoryObject`.
    pub fn open_directory_object(
        &self,
        process: &Arc<Process>,
        path: &str,
        inherit: bool,
    ) -> Result<OwnedHandle, NtStatus> {
        let dir = self.namespace.open_directory(path)?;
        let object = KernelObject::new(Some(path.to_owned()), ObjectBody::Directory(dir));
        Ok(OwnedHandle::new(process, object, inherit))
    }

    #[must_use]
    pub fn console(&self) -> &Arc<ConsoleDevice> {
        &self.console
    }

    pub fn open_console(&self, process: &Arc<Process>, inherit: bool) -> OwnedHandle {
        let object = KernelObject::new(
            Some("CONIN$".to_owned()),
            ObjectBody::Console(Arc::clone(&self.console)),
        );
        OwnedHandle::new(process, object, inherit)
    }

    #[must_use]
    pub fn message_queue(&self) -> &Arc<MessageQueue> {
        &self.messages
    }

    pub fn open_message_queue(&self, process: &Arc<Process>, inherit: bool) -> OwnedHandle {
        let object = KernelObject::anonymous(ObjectBody::MessageQueue(Arc::clone(&self.messages)));
        OwnedHandle::new(process, object, inherit)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Kernel`] from its devices.
pub struct KernelBuilder {
    tapes: Vec<Arc<dyn TapeDriver>>,
    disks: Vec<Arc<dyn DiskDriver>>,
    floppies: Vec<Arc<dyn DiskDriver>>,
    serials: Vec<Arc<SerialPort>>,
    memory_pages: usize,
    page_size: usize,
    console_size: (u16, u16),
    registry: Option<Registry>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tapes: Vec::new(),
            disks: Vec::new(),
            floppies: Vec::new(),
            serials: Vec::new(),
            memory_pages: 16,
            page_size: 4096,
            console_size: (80, 25),
            registry: None,
        }
    }

    /// One tape, one partitioned disk, one floppy and one serial port.
    #[must_use]
    pub fn simulated() -> Self {
        let disk = SimDisk::new(2048, 512);
        disk.add_partition(64, 960, true);
        disk.add_partition(1024, 1024, false);
        Self::new()
            .tape(Arc::new(SimTape::new(4096)))
            .disk(Arc::new(disk))
            .floppy(Arc::new(SimDisk::floppy()))
            .serial(Arc::new(SerialPort::new()))
    }

    #[must_use]
    pub fn tape(mut self, driver: Arc<dyn TapeDriver>) -> Self {
        self.tapes.push(driver);
        self
    }

    #[must_use]
    pub fn disk(mut self, driver: Arc<dyn DiskDriver>) -> Self {
        self.disks.push(driver);
        self
    }

    #[must_use]
    pub fn floppy(mut self, driver: Arc<dyn DiskDriver>) -> Self {
        self.floppies.push(driver);
        self
    }

    #[must_use]
    pub fn serial(mut self, port: Arc<SerialPort>) -> Self {
        self.serials.push(port);
        self
    }

    #[must_use]
    pub fn physical_memory(mut self, pages: usize, page_size: usize) -> Self {
        self.memory_pages = pages;
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn console_size(mut self, width: u16, height: u16) -> Self {
        self.console_size = (width, height);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn populate_namespace(&self) -> Result<ObjectNamespace, NtStatus> {
        let ns = ObjectNamespace::new();
        ns.insert("\\Device\\Null", NsEntry::Device(DeviceType::Null))?;
        ns.insert("\\Device\\NamedPipe", NsEntry::Device(DeviceType::NamedPipe))?;
        ns.insert("\\Device\\PhysicalMemory", NsEntry::Device(DeviceType::Memory))?;
        ns.insert("\\Device\\ConDrv", NsEntry::Device(DeviceType::Console))?;
        for unit in 0..self.tapes.len() {
            ns.insert(&format!("\\Device\\Tape{unit}"), NsEntry::Device(DeviceType::Tape))?;
            ns.insert(
                &format!("\\GLOBAL??\\Tape{unit}"),
                NsEntry::SymbolicLink(format!("\\Device\\Tape{unit}")),
            )?;
        }
        for (unit, disk) in self.disks.iter().enumerate() {
            let dir = format!("\\Device\\Harddisk{unit}");
            ns.insert(&format!("{dir}\\Partition0"), NsEntry::Device(DeviceType::Disk))?;
            for p in disk.partitions() {
                ns.insert(
                    &format!("{dir}\\Partition{}", p.number),
                    NsEntry::Device(DeviceType::Disk),
                )?;
            }
            ns.insert(
                &format!("\\GLOBAL??\\PhysicalDrive{unit}"),
                NsEntry::SymbolicLink(format!("{dir}\\Partition0")),
            )?;
        }
        for unit in 0..self.floppies.len() {
            ns.insert(&format!("\\Device\\Floppy{unit}"), NsEntry::Device(DeviceType::Disk))?;
        }
        for unit in 0..self.serials.len() {
            ns.insert(&format!("\\Device\\Serial{unit}"), NsEntry::Device(DeviceType::Serial))?;
            ns.insert(
                &format!("\\GLOBAL??\\COM{}", unit + 1),
                NsEntry::SymbolicLink(format!("\\Device\\Serial{unit}")),
            )?;
        }
        ns.insert("\\GLOBAL??\\NUL", NsEntry::SymbolicLink("\\Device\\Null".into()))?;
        ns.insert("\\GLOBAL??\\Global", NsEntry::SymbolicLink("\\GLOBAL??".into()))?;
        ns.insert("\\BaseNamedObjects\\Global", NsEntry::SymbolicLink("\\BaseNamedObjects".into()))?;
        ns.insert("\\BaseNamedObjects\\ntposix.shared", NsEntry::Object("Section"))?;
        ns.insert("\\KernelObjects\\LowMemoryCondition", NsEntry::Object("Event"))?;
        ns.mkdir("\\Security")?.set_protected(true);
        Ok(ns)
    }

    pub fn build(self) -> Result<Arc<Kernel>, NtStatus> {
        let namespace = self.populate_namespace()?;
        let (width, height) = self.console_size;
        Ok(Arc::new(Kernel {
            processes: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(FIRST_PID),
            next_object_id: AtomicU64::new(1),
            named: Mutex::new(HashMap::new()),
            pipes: Mutex::new(HashMap::new()),
            fifos: Mutex::new(HashMap::new()),
            memory: Arc::new(PhysicalMemory::new(self.memory_pages, self.page_size)),
            registry: self.registry.unwrap_or_else(Registry::populated),
            namespace,
            console: Arc::new(ConsoleDevice::new(width, height)),
            messages: Arc::new(MessageQueue::new()),
            tapes: self.tapes,
            disks: self.disks,
            floppies: self.floppies,
            serials: self.serials,
            serial_objects: Mutex::new(HashMap::new()),
            ptys: Mutex::new(Vec::new()),
        }))
    }
}
