//! The POSIX call surface of one process.
//!
//! A [`ProcessContext`] owns the process environment and its descriptor
//! table. Path calls resolve the device variant, build and open a handle,
//! then install it; descriptor calls look the handle up and delegate.
//! Fork and exec are the two process transitions the table takes part in.

use std::sync::Arc;
use std::time::Duration;

use ntposix_native::Kernel;

use crate::config::RuntimeConfig;
use crate::device::{self, DeviceId, DevicePath};
use crate::dtable::{self, DescriptorTable};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::console::ConsoleHandler;
use crate::fhandler::disk::{DiskHandler, DiskUnit};
use crate::fhandler::mem::MemHandler;
use crate::fhandler::null::NullHandler;
use crate::fhandler::pipe::PipeHandler;
use crate::fhandler::procself::{ProcSelfHandler, fd_link};
use crate::fhandler::procsys::ProcSysHandler;
use crate::fhandler::pty::{PtyMasterHandler, PtySlaveHandler};
use crate::fhandler::registry::RegistryHandler;
use crate::fhandler::serial::SerialHandler;
use crate::fhandler::socket::{SOCK_CLOEXEC, SocketHandler};
use crate::fhandler::tape::TapeHandler;
use crate::fhandler::virt::Exists;
use crate::fhandler::windows::WindowsHandler;
use crate::fhandler::Fhandler;
use crate::flags::{
    Dirent, F_DUPFD, F_DUPFD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_CLOEXEC,
    O_DIRECTORY, O_NONBLOCK, O_RDONLY, S_IFDIR, SETFL_MASK, Stat, Whence, is_readable,
    is_writable,
};
use crate::ioctl::{IoctlArg, TCFLSH, TCGETS, TCSBRK, TCSETS, TCSETSF, TCSETSW, TCXONC, TIOCGPTN};
use crate::poll::{self, FdSet, PollFd};
use crate::security::{self, PermissionOracle, R_OK, UserContext, W_OK};
use crate::signal::{Disposition, MaskHow};
use crate::termios::{TCSADRAIN, TCSAFLUSH, TCSANOW, Termios};

/// Drop one slot-style reference to a handle that never made it into the
/// table.
fn discard(fh: &Arc<dyn Fhandler>) {
    let _ = dtable::release(fh);
}

pub struct ProcessContext {
    env: Arc<Env>,
    fds: Arc<DescriptorTable>,
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("pid", &self.pid())
            .field("fds", &self.fds)
            .finish()
    }
}

impl ProcessContext {
    /// A fresh top-level process on `kernel`.
    #[must_use]
    pub fn new(
        kernel: Arc<Kernel>,
        config: RuntimeConfig,
        oracle: Arc<dyn PermissionOracle>,
        user: UserContext,
    ) -> Self {
        let process = kernel.spawn_process(0);
        let open_max = config.open_max;
        let env = Arc::new(Env::new(kernel, process, config, oracle, user));
        Self::attach(env, DescriptorTable::new(open_max))
    }

    fn attach(env: Arc<Env>, table: DescriptorTable) -> Self {
        let fds = Arc::new(table);
        env.attach_table(&fds);
        Self { env, fds }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    #[must_use]
    pub fn table(&self) -> &Arc<DescriptorTable> {
        &self.fds
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.env.pid()
    }

    fn get(&self, fd: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        self.fds.get(fd)
    }

    // -----------------------------------------------------------------------
    // open
    // -----------------------------------------------------------------------

    pub fn open(&self, path: &str, flags: i32, mode: u32) -> Result<i32, Errno> {
        log::trace!("pid {}: open({path}, {flags:#o}, {mode:#o})", self.pid());
        let fh = self.open_handler(path, flags, mode)?;
        if flags & O_DIRECTORY != 0 {
            let is_dir = fh.fstat().is_ok_and(|st| st.file_type() == S_IFDIR);
            if !is_dir {
                discard(&fh);
                return Err(Errno::ENOTDIR);
            }
        }
        let fd = self.fds.install(fh, flags & O_CLOEXEC != 0)?;
        log::debug!("pid {}: open {path} -> fd {fd}", self.pid());
        Ok(fd)
    }

    fn is_own_pid(&self, pid: Option<u32>) -> bool {
        pid.is_none_or(|pid| pid == self.pid())
    }

    /// An opened handle for `path`, not yet installed.
    fn open_handler(&self, path: &str, flags: i32, mode: u32) -> Result<Arc<dyn Fhandler>, Errno> {
        let env = &self.env;
        let parsed = device::parse(path);

        // `/proc/self/fd/N` opens the object behind descriptor N again.
        if let Some(DevicePath::Proc { pid, rest }) = &parsed {
            if let Some(fd) = fd_link(rest).filter(|_| self.is_own_pid(*pid)) {
                let target = self.get(fd).map_err(|_| Errno::ENOENT)?;
                return match target.reopen(flags) {
                    Err(Errno::ENOSYS) => {
                        let name = target.base().name().to_owned();
                        if name == path {
                            return Err(Errno::ENXIO);
                        }
                        self.open_handler(&name, flags, mode)
                    }
                    other => other,
                };
            }
        }

        let mut access = 0;
        if is_readable(flags) {
            access |= R_OK;
        }
        if is_writable(flags) {
            access |= W_OK;
        }
        security::require(env.oracle.as_ref(), &env.user, path, access)?;

        let fh: Arc<dyn Fhandler> = match parsed {
            Some(DevicePath::Null) => Arc::new(NullHandler::new(env, path, false, flags)),
            Some(DevicePath::Zero) => Arc::new(NullHandler::new(env, path, true, flags)),
            Some(DevicePath::Mem { unit }) => Arc::new(MemHandler::new(env, path, unit, flags)),
            Some(DevicePath::Tape { unit, rewind }) => {
                Arc::new(TapeHandler::new(env, path, unit, rewind, flags))
            }
            Some(DevicePath::Floppy { unit }) => {
                Arc::new(DiskHandler::new(env, path, DiskUnit::Floppy(unit), flags))
            }
            Some(DevicePath::Disk { drive, partition }) => Arc::new(DiskHandler::new(
                env,
                path,
                DiskUnit::Hard { drive, partition },
                flags,
            )),
            Some(DevicePath::Console) => {
                return self.open_archetype(path, DevicePath::Console.device_id(), flags, mode, || {
                    Arc::new(ConsoleHandler::new(env, path, flags))
                });
            }
            Some(DevicePath::Serial { unit }) => {
                Arc::new(SerialHandler::new(env, path, unit, flags))
            }
            Some(DevicePath::Ptmx) => Arc::new(PtyMasterHandler::new(env, path, flags)),
            Some(DevicePath::PtySlave { index }) => {
                let dev = DevicePath::PtySlave { index }.device_id();
                return self.open_archetype(path, dev, flags, mode, || {
                    Arc::new(PtySlaveHandler::new(env, path, index, flags))
                });
            }
            Some(DevicePath::Windows) => Arc::new(WindowsHandler::new(env, path, flags)),
            Some(DevicePath::Registry(rest)) => {
                Arc::new(RegistryHandler::new(env, path, &rest, flags))
            }
            Some(DevicePath::ProcSys(rest)) => {
                Arc::new(ProcSysHandler::new(env, path, &rest, flags))
            }
            Some(DevicePath::Proc { pid, rest }) => {
                Arc::new(ProcSelfHandler::new(env, path, pid, &rest, flags))
            }
            None if env.kernel.fifo(path).is_some() => {
                Arc::new(PipeHandler::fifo(env, path, flags))
            }
            None => return Err(Errno::ENOENT),
        };
        fh.open(flags, mode)?;
        Ok(fh)
    }

    /// Every open of an archetype device in this process aliases one shared
    /// handle; only the first open builds and opens it.
    fn open_archetype(
        &self,
        path: &str,
        dev: DeviceId,
        flags: i32,
        mode: u32,
        make: impl FnOnce() -> Arc<dyn Fhandler>,
    ) -> Result<Arc<dyn Fhandler>, Errno> {
        let mut fresh = false;
        let fh = self.env.alias_or_open_archetype(dev, || {
            let fh = make();
            fh.open(flags, mode)?;
            fresh = true;
            Ok(fh)
        })?;
        if !fresh {
            log::trace!("pid {}: {path} aliases an open archetype", self.pid());
        }
        Ok(fh)
    }

    // -----------------------------------------------------------------------
    // Descriptor I/O
    // -----------------------------------------------------------------------

    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize, Errno> {
        self.get(fd)?.read(buf)
    }

    pub fn write(&self, fd: i32, buf: &[u8]) -> Result<usize, Errno> {
        self.get(fd)?.write(buf)
    }

    pub fn lseek(&self, fd: i32, offset: i64, whence: i32) -> Result<u64, Errno> {
        let fh = self.get(fd)?;
        let whence = Whence::from_raw(whence).ok_or(Errno::EINVAL)?;
        fh.lseek(offset, whence)
    }

    pub fn ioctl(&self, fd: i32, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        log::trace!("pid {}: ioctl({fd}, {cmd:#x})", self.pid());
        self.get(fd)?.ioctl(cmd, arg)
    }

    pub fn fstat(&self, fd: i32) -> Result<Stat, Errno> {
        self.get(fd)?.fstat()
    }

    pub fn close(&self, fd: i32) -> Result<(), Errno> {
        log::trace!("pid {}: close({fd})", self.pid());
        self.fds.close(fd)
    }

    pub fn dup(&self, fd: i32) -> Result<i32, Errno> {
        self.fds.dup(fd)
    }

    pub fn dup2(&self, fd: i32, target: i32) -> Result<i32, Errno> {
        self.fds.dup2(fd, target)
    }

    pub fn fcntl(&self, fd: i32, cmd: i32, arg: i64) -> Result<i64, Errno> {
        let int_arg = || i32::try_from(arg).map_err(|_| Errno::EINVAL);
        match cmd {
            F_DUPFD => Ok(self.fds.dup_from(fd, int_arg()?, false)?.into()),
            F_DUPFD_CLOEXEC => Ok(self.fds.dup_from(fd, int_arg()?, true)?.into()),
            F_GETFD => Ok(if self.fds.cloexec(fd)? {
                FD_CLOEXEC.into()
            } else {
                0
            }),
            F_SETFD => {
                self.fds.set_cloexec(fd, int_arg()? & FD_CLOEXEC != 0)?;
                Ok(0)
            }
            F_GETFL => Ok((self.get(fd)?.base().flags() & !O_CLOEXEC).into()),
            F_SETFL => {
                let fh = self.get(fd)?;
                let old = fh.base().flags();
                fh.base()
                    .set_flags((old & !SETFL_MASK) | (int_arg()? & SETFL_MASK));
                Ok(0)
            }
            _ => Err(Errno::EINVAL),
        }
    }

    // -----------------------------------------------------------------------
    // Pipes and FIFOs
    // -----------------------------------------------------------------------

    /// `pipe2(flags)`: `[read end, write end]`.
    pub fn pipe(&self, flags: i32) -> Result<[i32; 2], Errno> {
        if flags & !(O_NONBLOCK | O_CLOEXEC) != 0 {
            return Err(Errno::EINVAL);
        }
        let (read, write) = PipeHandler::create_pair(&self.env, flags)?;
        self.install_pair(read, write, flags & O_CLOEXEC != 0)
    }

    fn install_pair(
        &self,
        a: Arc<dyn Fhandler>,
        b: Arc<dyn Fhandler>,
        cloexec: bool,
    ) -> Result<[i32; 2], Errno> {
        let first = match self.fds.install(a, cloexec) {
            Ok(fd) => fd,
            Err(e) => {
                discard(&b);
                return Err(e);
            }
        };
        match self.fds.install(b, cloexec) {
            Ok(second) => Ok([first, second]),
            Err(e) => {
                let _ = self.fds.close(first);
                Err(e)
            }
        }
    }

    pub fn mkfifo(&self, path: &str, _mode: u32) -> Result<(), Errno> {
        if device::parse(path).is_some() {
            return Err(Errno::EEXIST);
        }
        let env = &self.env;
        security::require(env.oracle.as_ref(), &env.user, path, W_OK)?;
        env.kernel.create_fifo(path, env.config.pipe_buffer_size)?;
        log::debug!("pid {}: mkfifo {path}", self.pid());
        Ok(())
    }

    /// Remove a FIFO name; open ends keep working.
    pub fn unlink(&self, path: &str) -> Result<(), Errno> {
        if device::parse(path).is_some() {
            return Err(Errno::EPERM);
        }
        Ok(self.env.kernel.remove_fifo(path)?)
    }

    // -----------------------------------------------------------------------
    // Metadata and directories
    // -----------------------------------------------------------------------

    pub fn fchmod(&self, fd: i32, mode: u32) -> Result<(), Errno> {
        self.get(fd)?.fchmod(mode)
    }

    pub fn fchown(&self, fd: i32, uid: u32, gid: u32) -> Result<(), Errno> {
        self.get(fd)?.fchown(uid, gid)
    }

    pub fn opendir(&self, path: &str) -> Result<i32, Errno> {
        self.open(path, O_RDONLY | O_DIRECTORY, 0)
    }

    pub fn readdir(&self, fd: i32) -> Result<Option<Dirent>, Errno> {
        self.get(fd)?.readdir()
    }

    pub fn telldir(&self, fd: i32) -> Result<u64, Errno> {
        self.get(fd)?.telldir()
    }

    pub fn seekdir(&self, fd: i32, pos: u64) -> Result<(), Errno> {
        self.get(fd)?.seekdir(pos)
    }

    pub fn rewinddir(&self, fd: i32) -> Result<(), Errno> {
        self.get(fd)?.rewinddir()
    }

    pub fn closedir(&self, fd: i32) -> Result<(), Errno> {
        self.close(fd)
    }

    /// Symbolic links exist only under `/proc`: `/proc/self` itself, the
    /// descriptor links below it and object-manager links in `/proc/sys`.
    pub fn readlink(&self, path: &str) -> Result<String, Errno> {
        match device::parse(path) {
            Some(DevicePath::Proc { pid: None, rest }) if rest.is_empty() => {
                Ok(self.pid().to_string())
            }
            Some(DevicePath::Proc { pid, rest }) => {
                let fh = ProcSelfHandler::new(&self.env, path, pid, &rest, O_RDONLY);
                match fh.exists() {
                    Exists::None => Err(Errno::ENOENT),
                    Exists::Symlink => fh.readlink(),
                    _ => Err(Errno::EINVAL),
                }
            }
            Some(DevicePath::ProcSys(rest)) => {
                ProcSysHandler::new(&self.env, path, &rest, O_RDONLY).readlink()
            }
            Some(_) => Err(Errno::EINVAL),
            None if self.env.kernel.fifo(path).is_some() => Err(Errno::EINVAL),
            None => Err(Errno::ENOENT),
        }
    }

    // -----------------------------------------------------------------------
    // Sockets and terminals
    // -----------------------------------------------------------------------

    pub fn socketpair(&self, domain: i32, kind: i32, protocol: i32) -> Result<[i32; 2], Errno> {
        let (a, b) = SocketHandler::pair(&self.env, domain, kind, protocol)?;
        self.install_pair(a, b, kind & SOCK_CLOEXEC != 0)
    }

    pub fn shutdown(&self, fd: i32, how: i32) -> Result<(), Errno> {
        self.get(fd)?.shutdown(how)
    }

    pub fn isatty(&self, fd: i32) -> Result<bool, Errno> {
        Ok(self.get(fd)?.is_tty())
    }

    fn tty(&self, fd: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        let fh = self.get(fd)?;
        if fh.is_tty() { Ok(fh) } else { Err(Errno::ENOTTY) }
    }

    pub fn tcgetattr(&self, fd: i32) -> Result<Termios, Errno> {
        let mut tio = Termios::default();
        self.tty(fd)?.ioctl(TCGETS, IoctlArg::Termios(&mut tio))?;
        Ok(tio)
    }

    pub fn tcsetattr(&self, fd: i32, action: i32, tio: &Termios) -> Result<(), Errno> {
        let cmd = match action {
            TCSANOW => TCSETS,
            TCSADRAIN => TCSETSW,
            TCSAFLUSH => TCSETSF,
            _ => return Err(Errno::EINVAL),
        };
        let mut copy = *tio;
        self.tty(fd)?.ioctl(cmd, IoctlArg::Termios(&mut copy))?;
        Ok(())
    }

    /// `queue` is one of `TCIFLUSH`, `TCOFLUSH` or `TCIOFLUSH`.
    pub fn tcflush(&self, fd: i32, queue: i64) -> Result<(), Errno> {
        self.tty(fd)?.ioctl(TCFLSH, IoctlArg::Int(queue)).map(|_| ())
    }

    pub fn tcdrain(&self, fd: i32) -> Result<(), Errno> {
        self.tty(fd)?.ioctl(TCSBRK, IoctlArg::Int(1)).map(|_| ())
    }

    pub fn tcflow(&self, fd: i32, action: i64) -> Result<(), Errno> {
        self.tty(fd)?.ioctl(TCXONC, IoctlArg::Int(action)).map(|_| ())
    }

    /// The break length is fixed; `duration` is accepted and ignored.
    pub fn tcsendbreak(&self, fd: i32, _duration: i32) -> Result<(), Errno> {
        self.tty(fd)?.ioctl(TCSBRK, IoctlArg::Int(0)).map(|_| ())
    }

    /// Path of the slave belonging to the pty master open on `fd`.
    pub fn ptsname(&self, fd: i32) -> Result<String, Errno> {
        let mut index = 0;
        self.tty(fd)?.ioctl(TIOCGPTN, IoctlArg::IntOut(&mut index))?;
        Ok(format!("/dev/tty{index}"))
    }

    // -----------------------------------------------------------------------
    // Multiplexing
    // -----------------------------------------------------------------------

    /// `poll(fds, timeout_ms)`; -1 waits forever.
    pub fn poll(&self, fds: &mut [PollFd], timeout_ms: i32) -> Result<usize, Errno> {
        if !poll::valid_poll_timeout(timeout_ms) {
            return Err(Errno::EINVAL);
        }
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        poll::poll(&self.env, &self.fds, fds, timeout)
    }

    pub fn select(
        &self,
        nfds: i32,
        read: Option<&mut FdSet>,
        write: Option<&mut FdSet>,
        except: Option<&mut FdSet>,
        timeout: Option<Duration>,
    ) -> Result<usize, Errno> {
        poll::select(&self.env, &self.fds, nfds, read, write, except, timeout)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    pub fn raise(&self, sig: i32) -> Result<(), Errno> {
        self.env.signals.raise(sig)
    }

    pub fn set_disposition(&self, sig: i32, disposition: Disposition) -> Result<Disposition, Errno> {
        self.env.signals.set_disposition(sig, disposition)
    }

    /// Returns the previous mask.
    pub fn sigprocmask(&self, how: MaskHow, set: u64) -> u64 {
        self.env.signals.set_mask(how, set)
    }

    /// Take the pending, unblocked signals.
    pub fn deliver_pending(&self) -> Vec<i32> {
        self.env.signals.deliver_pending()
    }

    // -----------------------------------------------------------------------
    // Process transitions
    // -----------------------------------------------------------------------

    /// The child side of `fork`. Inherited native handles are claimed by the
    /// copied descriptions; anything the child inherited but no description
    /// claimed is closed.
    pub fn fork(&self) -> Result<Self, Errno> {
        let kernel = &self.env.kernel;
        let process = kernel.fork_process(&self.env.process);
        let child = Arc::new(self.env.fork_child(Arc::clone(&process)));
        let table = match self.fds.fork(&child, &self.env.process) {
            Ok(table) => table,
            Err(e) => {
                log::warn!("pid {}: fork failed: {e}", self.pid());
                kernel.exit_process(process.pid());
                return Err(e);
            }
        };
        let ctx = Self::attach(child, table);
        for fd in ctx.fds.open_fds() {
            if let Ok(fh) = ctx.fds.get(fd) {
                if fh.is_archetype() {
                    ctx.env.register_archetype(fh.base().dev(), &fh);
                }
            }
        }
        let stray = process.release_unclaimed();
        log::debug!(
            "pid {}: forked child {} ({stray} unclaimed handles closed)",
            self.pid(),
            ctx.pid()
        );
        Ok(ctx)
    }

    /// Replace the process image: close-on-exec descriptors go, the rest
    /// stay open with their transient state reset.
    pub fn exec(&self, exename: &str, argv: &[String]) {
        log::debug!("pid {}: exec {exename}", self.pid());
        self.env.set_image(exename, argv);
        self.fds.exec();
    }

    pub fn exit(&self) {
        log::debug!("pid {}: exit", self.pid());
        self.fds.close_all();
        self.env.kernel.exit_process(self.pid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_RDWR, O_WRONLY, SEEK_SET};
    use crate::testing::TestRig;

    #[test]
    fn unknown_paths_are_enoent() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        assert_eq!(ctx.open("/dev/bogus", O_RDONLY, 0), Err(Errno::ENOENT));
        assert_eq!(ctx.open("/tmp/nothing", O_RDONLY, 0), Err(Errno::ENOENT));
    }

    #[test]
    fn lowest_free_descriptor() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        let a = ctx.open("/dev/null", O_RDWR, 0).unwrap();
        let b = ctx.open("/dev/zero", O_RDONLY, 0).unwrap();
        assert_eq!((a, b), (0, 1));
        ctx.close(a).unwrap();
        assert_eq!(ctx.open("/dev/null", O_WRONLY, 0).unwrap(), 0);
        assert_eq!(ctx.lseek(b, 0, 9), Err(Errno::EINVAL));
        assert!(ctx.lseek(b, 0, SEEK_SET).is_ok());
    }

    #[test]
    fn fcntl_flags_and_cloexec() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        let fd = ctx.open("/dev/null", O_RDWR | O_CLOEXEC, 0).unwrap();
        assert_eq!(ctx.fcntl(fd, F_GETFD, 0).unwrap(), i64::from(FD_CLOEXEC));
        ctx.fcntl(fd, F_SETFD, 0).unwrap();
        assert_eq!(ctx.fcntl(fd, F_GETFD, 0).unwrap(), 0);
        ctx.fcntl(fd, F_SETFL, i64::from(O_NONBLOCK | O_WRONLY)).unwrap();
        let fl = ctx.fcntl(fd, F_GETFL, 0).unwrap();
        assert_eq!(fl, i64::from(O_RDWR | O_NONBLOCK));
        assert_eq!(ctx.fcntl(fd, F_DUPFD, 10).unwrap(), 10);
        assert_eq!(ctx.fcntl(fd, 999, 0), Err(Errno::EINVAL));
    }

    #[test]
    fn o_directory_rejects_files() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        assert_eq!(
            ctx.open("/dev/null", O_RDONLY | O_DIRECTORY, 0),
            Err(Errno::ENOTDIR)
        );
        assert!(ctx.opendir("/proc/self").is_ok());
    }

    #[test]
    fn console_opens_alias_one_object() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        let a = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
        let b = ctx.open("/dev/console", O_RDWR, 0).unwrap();
        let fa = ctx.table().get(a).unwrap();
        let fb = ctx.table().get(b).unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
        assert_eq!(fa.base().refs(), 2);
        assert!(ctx.isatty(a).unwrap());
        ctx.close(a).unwrap();
        assert_eq!(fb.base().refs(), 1);
        assert!(ctx.tcgetattr(b).is_ok());
    }

    #[test]
    fn termios_calls_need_a_tty() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        let fd = ctx.open("/dev/null", O_RDWR, 0).unwrap();
        assert!(!ctx.isatty(fd).unwrap());
        assert_eq!(ctx.tcgetattr(fd).err(), Some(Errno::ENOTTY));
        let tty = ctx.open("/dev/tty", O_RDWR, 0).unwrap();
        let mut tio = ctx.tcgetattr(tty).unwrap();
        tio.make_raw();
        assert_eq!(ctx.tcsetattr(tty, 42, &tio), Err(Errno::EINVAL));
        ctx.tcsetattr(tty, TCSANOW, &tio).unwrap();
        assert_eq!(ctx.tcgetattr(tty).unwrap(), tio);
    }

    #[test]
    fn readlink_under_proc() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        let [r, _w] = ctx.pipe(0).unwrap();
        assert_eq!(ctx.readlink("/proc/self").unwrap(), ctx.pid().to_string());
        let target = ctx.readlink(&format!("/proc/self/fd/{r}")).unwrap();
        assert!(target.starts_with("pipe:["));
        assert_eq!(ctx.readlink("/proc/self/fd/77"), Err(Errno::ENOENT));
        assert_eq!(ctx.readlink("/proc/self/ppid"), Err(Errno::EINVAL));
        assert_eq!(ctx.readlink("/dev/null"), Err(Errno::EINVAL));
    }

    #[test]
    fn mkfifo_then_open_both_ends() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        ctx.mkfifo("/tmp/f", 0o600).unwrap();
        assert_eq!(ctx.mkfifo("/tmp/f", 0o600), Err(Errno::EEXIST));
        assert_eq!(ctx.mkfifo("/dev/null", 0o600), Err(Errno::EEXIST));
        let r = ctx.open("/tmp/f", O_RDONLY | O_NONBLOCK, 0).unwrap();
        let w = ctx.open("/tmp/f", O_WRONLY, 0).unwrap();
        assert_eq!(ctx.write(w, b"abc").unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(ctx.read(r, &mut buf).unwrap(), 3);
        ctx.unlink("/tmp/f").unwrap();
        assert_eq!(ctx.open("/tmp/f", O_RDONLY, 0), Err(Errno::ENOENT));
    }

    #[test]
    fn pipe_rejects_unknown_flags() {
        let rig = TestRig::new().build();
        let ctx = rig.context();
        assert_eq!(ctx.pipe(O_DIRECTORY), Err(Errno::EINVAL));
        let [r, w] = ctx.pipe(O_CLOEXEC).unwrap();
        assert!(ctx.table().cloexec(r).unwrap());
        assert!(ctx.table().cloexec(w).unwrap());
    }
}
