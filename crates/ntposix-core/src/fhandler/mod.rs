//! Handle objects.
//!
//! Every open file description is an `Arc<dyn Fhandler>`. The trait carries
//! the whole POSIX surface with defaults; each device class implements the
//! part it supports and composes the shared pieces ([`FhBase`],
//! [`NtHandle`], the raw-device buffer and the virtual-file buffer).
//!
//! State: unopened → open → (variant-specific draining) → closed. The
//! descriptor table calls [`Fhandler::close`] once, when the last slot
//! referring to the object is released.

pub mod console;
pub mod disk;
pub mod mem;
pub mod null;
pub mod pipe;
pub mod procself;
pub mod procsys;
pub mod pty;
pub mod raw;
pub mod registry;
pub mod serial;
pub mod socket;
pub mod tape;
pub mod virt;
pub mod windows;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ntposix_native::console::ConsoleDevice;
use ntposix_native::msgqueue::MessageQueue;
use ntposix_native::pipe::PipeShared;
use ntposix_native::sync::wait_for;
use ntposix_native::{KernelObject, OwnedHandle, Process, RawHandle};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DeviceId, hash_name};
use crate::env::Env;
use crate::errno::Errno;
use crate::flags::{Dirent, O_NONBLOCK, Stat, Whence, is_readable, is_writable};
use crate::ioctl::{FIONBIO, IoctlArg};
use crate::security::Change;

// ---------------------------------------------------------------------------
// Common state
// ---------------------------------------------------------------------------

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Fields every handle carries.
pub struct FhBase {
    class: DeviceClass,
    dev: DeviceId,
    name: String,
    flags: AtomicI32,
    ino: u64,
    opened_at: i64,
    refs: AtomicUsize,
    env: Arc<Env>,
}

impl fmt::Debug for FhBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhBase")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("flags", &format_args!("{:#o}", self.flags()))
            .field("refs", &self.refs())
            .finish_non_exhaustive()
    }
}

impl FhBase {
    #[must_use]
    pub fn new(env: &Arc<Env>, class: DeviceClass, dev: DeviceId, name: &str, flags: i32) -> Self {
        Self {
            class,
            dev,
            name: name.to_owned(),
            flags: AtomicI32::new(flags),
            ino: hash_name(name),
            opened_at: now_secs(),
            refs: AtomicUsize::new(1),
            env: Arc::clone(env),
        }
    }

    /// Replace the name-derived inode number.
    #[must_use]
    pub fn with_ino(mut self, ino: u64) -> Self {
        self.ino = ino;
        self
    }

    /// Same description in another slot of the same process.
    #[must_use]
    pub fn dup_copy(&self) -> Self {
        self.copy_for(&self.env)
    }

    /// Same description, owned by a forked child.
    #[must_use]
    pub fn copy_for(&self, env: &Arc<Env>) -> Self {
        Self {
            class: self.class,
            dev: self.dev,
            name: self.name.clone(),
            flags: AtomicI32::new(self.flags()),
            ino: self.ino,
            opened_at: self.opened_at,
            refs: AtomicUsize::new(1),
            env: Arc::clone(env),
        }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    #[must_use]
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    #[must_use]
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ino(&self) -> u64 {
        self.ino
    }

    #[must_use]
    pub fn flags(&self) -> i32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn set_flags(&self, flags: i32) {
        self.flags.store(flags, Ordering::Release);
    }

    #[must_use]
    pub fn readable(&self) -> bool {
        is_readable(self.flags())
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        is_writable(self.flags())
    }

    #[must_use]
    pub fn nonblocking(&self) -> bool {
        self.flags() & O_NONBLOCK != 0
    }

    pub fn set_nonblocking(&self, on: bool) {
        if on {
            self.flags.fetch_or(O_NONBLOCK, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!O_NONBLOCK, Ordering::AcqRel);
        }
    }

    // -----------------------------------------------------------------------
    // Reference counting (shared descriptions)
    // -----------------------------------------------------------------------

    pub fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Take a reference unless the count already reached zero.
    pub fn try_add_ref(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .is_ok()
    }

    /// Drop one slot reference. `true` when it was the last one.
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    #[must_use]
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    /// Generic `fstat` fields.
    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            st_dev: self.dev.rdev(),
            st_ino: self.ino,
            st_mode: self.class.default_mode(),
            st_nlink: 1,
            st_uid: self.env.user.uid,
            st_gid: self.env.user.gid,
            st_rdev: self.dev.rdev(),
            st_size: 0,
            st_blksize: 4096,
            st_blocks: 0,
            st_atime: self.opened_at,
            st_mtime: self.opened_at,
            st_ctime: self.opened_at,
        }
    }

    /// Base ioctl: `FIONBIO` toggles non-blocking mode, nothing else is known.
    pub fn ioctl(&self, cmd: u64, arg: &IoctlArg<'_>) -> Result<i64, Errno> {
        if cmd == FIONBIO {
            let on = arg.int_value().ok_or(Errno::EINVAL)? != 0;
            self.set_nonblocking(on);
            return Ok(0);
        }
        log::debug!("{}: ioctl {cmd:#x} not supported", self.name);
        Err(Errno::ENOTTY)
    }

    /// Error for a transfer the variant does not implement.
    #[must_use]
    pub fn unsupported_transfer(&self, write: bool) -> Errno {
        let allowed = if write {
            self.writable()
        } else {
            self.readable()
        };
        if allowed { Errno::EINVAL } else { Errno::EBADF }
    }

    /// Ask the permission oracle about an attribute change.
    pub fn check_change(&self, change: Change) -> Result<(), Errno> {
        if self
            .env
            .oracle
            .check_change(&self.env.user, &self.name, change)
        {
            Ok(())
        } else {
            Err(Errno::EPERM)
        }
    }
}

// ---------------------------------------------------------------------------
// Native handle ownership
// ---------------------------------------------------------------------------

enum HandleState {
    Bound(OwnedHandle),
    /// Copied into a forked child but not inherited: duplicated from the
    /// parent by `fixup_after_fork`.
    PendingFork {
        raw: RawHandle,
        child: Arc<Process>,
    },
    Closed,
}

/// One native handle owned by a handle object.
pub struct NtHandle {
    state: Mutex<HandleState>,
}

impl fmt::Debug for NtHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            HandleState::Bound(h) => write!(f, "NtHandle({})", h.raw()),
            HandleState::PendingFork { raw, .. } => write!(f, "NtHandle(pending {raw})"),
            HandleState::Closed => f.write_str("NtHandle(closed)"),
        }
    }
}

impl NtHandle {
    #[must_use]
    pub fn new(handle: OwnedHandle) -> Self {
        Self {
            state: Mutex::new(HandleState::Bound(handle)),
        }
    }

    /// A handle slot with nothing bound yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(HandleState::Closed),
        }
    }

    /// Bind `handle`, closing whatever was bound before.
    pub fn bind(&self, handle: OwnedHandle) {
        *self.state.lock() = HandleState::Bound(handle);
    }

    /// The object behind the handle; `EBADF` once closed or while a fork
    /// fixup is outstanding.
    pub fn object(&self) -> Result<Arc<KernelObject>, Errno> {
        match &*self.state.lock() {
            HandleState::Bound(h) => Ok(Arc::clone(h.object())),
            _ => Err(Errno::EBADF),
        }
    }

    #[must_use]
    pub fn raw(&self) -> Option<RawHandle> {
        match &*self.state.lock() {
            HandleState::Bound(h) => Some(h.raw()),
            HandleState::PendingFork { raw, .. } => Some(*raw),
            HandleState::Closed => None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), HandleState::Bound(_))
    }

    /// A second handle to the same object in the same process.
    pub fn duplicate(&self, inherit: bool) -> Result<Self, Errno> {
        match &*self.state.lock() {
            HandleState::Bound(h) => Ok(Self::new(h.duplicate(inherit))),
            _ => Err(Errno::EBADF),
        }
    }

    /// The child's view after fork: inheritable handles are claimed from the
    /// child's table, the rest wait for [`NtHandle::fixup_after_fork`].
    pub fn fork_copy(&self, child: &Arc<Process>) -> Result<Self, Errno> {
        let state = match &*self.state.lock() {
            HandleState::Bound(h) => {
                if h.is_inheritable()? {
                    HandleState::Bound(OwnedHandle::adopt(child, h.raw())?)
                } else {
                    HandleState::PendingFork {
                        raw: h.raw(),
                        child: Arc::clone(child),
                    }
                }
            }
            HandleState::PendingFork { .. } | HandleState::Closed => HandleState::Closed,
        };
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Duplicate a non-inherited handle from `parent`.
    pub fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        let mut state = self.state.lock();
        if let HandleState::PendingFork { raw, child } = &*state {
            let dup = OwnedHandle::duplicate_from(parent, *raw, child, false)?;
            log::trace!("pid {}: duplicated {raw} from parent", child.pid());
            *state = HandleState::Bound(dup);
        }
        Ok(())
    }

    pub fn set_inherit(&self, inherit: bool) -> Result<(), Errno> {
        match &*self.state.lock() {
            HandleState::Bound(h) => Ok(h.set_inherit(inherit)?),
            _ => Err(Errno::EBADF),
        }
    }

    pub fn close(&self) {
        *self.state.lock() = HandleState::Closed;
    }
}

// ---------------------------------------------------------------------------
// Readiness and waiting
// ---------------------------------------------------------------------------

/// Answer to a readiness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    pub const ALWAYS: Self = Self {
        readable: true,
        writable: true,
        hangup: false,
        error: false,
    };
}

/// What a blocked caller parks on between readiness checks.
#[derive(Clone)]
pub enum WaitSource {
    /// A semaphore or event; a wake-up consumes it.
    Object(Arc<KernelObject>),
    Pipe(Arc<PipeShared>),
    Console(Arc<ConsoleDevice>),
    Messages(Arc<MessageQueue>),
    /// Nothing to wait on: sleep the slice.
    Poll,
}

impl fmt::Debug for WaitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Object(_) => "Object",
            Self::Pipe(_) => "Pipe",
            Self::Console(_) => "Console",
            Self::Messages(_) => "Messages",
            Self::Poll => "Poll",
        };
        f.write_str(kind)
    }
}

impl WaitSource {
    /// Park for at most `slice`.
    pub fn park(&self, slice: Duration) {
        match self {
            Self::Object(object) => match object.as_waitable() {
                Ok(waitable) => {
                    let _ = wait_for(waitable, Some(slice), slice, &|| false);
                }
                Err(_) => std::thread::sleep(slice),
            },
            Self::Pipe(shared) => shared.wait_change(slice),
            Self::Console(console) => console.wait_input(slice),
            Self::Messages(queue) => queue.wait_change(slice),
            Self::Poll => std::thread::sleep(slice),
        }
    }
}

// ---------------------------------------------------------------------------
// The handle trait
// ---------------------------------------------------------------------------

/// One open file description.
pub trait Fhandler: Send + Sync {
    fn base(&self) -> &FhBase;

    /// Validate `flags` and acquire resources. Called once, before the
    /// handle is installed.
    fn open(&self, _flags: i32, _mode: u32) -> Result<(), Errno> {
        Ok(())
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(self.base().unsupported_transfer(false))
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, Errno> {
        Err(self.base().unsupported_transfer(true))
    }

    fn lseek(&self, _offset: i64, _whence: Whence) -> Result<u64, Errno> {
        Err(Errno::ESPIPE)
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        self.base().ioctl(cmd, &arg)
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        Ok(self.base().stat())
    }

    /// Release native resources. Called when the last reference goes.
    fn close(&self) -> Result<(), Errno> {
        Ok(())
    }

    /// A description for a new slot: the same object for shared
    /// descriptions, an independent copy with duplicated handles otherwise.
    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno>;

    /// The child's copy after fork; handles not inherited are fixed up by
    /// [`Fhandler::fixup_after_fork`].
    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno>;

    fn fixup_after_fork(&self, _parent: &Process) -> Result<(), Errno> {
        Ok(())
    }

    /// Reset transient state after the process image is replaced.
    fn fixup_after_exec(&self) {}

    /// Flip the inheritance flag of every native handle the object owns.
    fn set_close_on_exec(&self, _cloexec: bool) -> Result<(), Errno> {
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        Readiness::ALWAYS
    }

    fn wait_source(&self) -> WaitSource {
        WaitSource::Poll
    }

    fn fchmod(&self, mode: u32) -> Result<(), Errno> {
        self.base().check_change(Change::Mode(mode))
    }

    fn fchown(&self, uid: u32, gid: u32) -> Result<(), Errno> {
        self.base().check_change(Change::Owner { uid, gid })
    }

    fn readdir(&self) -> Result<Option<Dirent>, Errno> {
        Err(Errno::ENOTDIR)
    }

    fn telldir(&self) -> Result<u64, Errno> {
        Err(Errno::ENOTDIR)
    }

    fn seekdir(&self, _pos: u64) -> Result<(), Errno> {
        Err(Errno::ENOTDIR)
    }

    fn rewinddir(&self) -> Result<(), Errno> {
        Err(Errno::ENOTDIR)
    }

    fn readlink(&self) -> Result<String, Errno> {
        Err(Errno::EINVAL)
    }

    /// A new description on the same object (`/proc/<pid>/fd/<n>`).
    fn reopen(&self, _flags: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        Err(Errno::ENOSYS)
    }

    fn shutdown(&self, _how: i32) -> Result<(), Errno> {
        Err(Errno::ENOTSOCK)
    }

    fn is_tty(&self) -> bool {
        false
    }

    /// Shared by every slot that opens the same device.
    fn is_archetype(&self) -> bool {
        false
    }

    /// Link target shown under `/proc/<pid>/fd`.
    fn proc_name(&self) -> String {
        self.base().name().to_owned()
    }
}

impl fmt::Debug for dyn Fhandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.base().fmt(f)
    }
}
