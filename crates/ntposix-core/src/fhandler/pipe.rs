//! Anonymous pipes and FIFOs over named pipes.
//!
//! The native primitives never block. This module layers POSIX semantics on
//! top: blocking reads park until data or EOF, writes of at most
//! [`PIPE_BUF`] bytes are all-or-nothing, and writes with no reader left
//! raise `SIGPIPE` and fail with `EPIPE`.
//!
//! An anonymous pipe carries two extra objects per end. A named mutex
//! serializes readers (or writers) of the same end across processes, so
//! concurrent atomic writes never interleave; it is created non-inheritable
//! and duplicated from the parent after fork. A select semaphore shared by
//! both ends is released whenever data moves or an end closes, which wakes
//! parked readers, writers and poll waiters.

use std::sync::Arc;
use std::time::Duration;

use ntposix_native::pipe::{NamedPipeState, PipeEnd, PipeSide};
use ntposix_native::sync::{WaitStatus, wait_for};
use ntposix_native::{KernelObject, NtStatus, Process};

use crate::config::PIPE_BUF;
use crate::device::{DeviceClass, DeviceId, VIRT_MAJOR};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle, Readiness, WaitSource};
use crate::flags::{O_ACCMODE, O_CLOEXEC, O_NONBLOCK, O_RDONLY, O_RDWR, O_WRONLY, Stat, access_mode};
use crate::ioctl::{FIONREAD, IoctlArg};
use crate::signal::SIGPIPE;

/// Device number shared by pipes and FIFOs.
pub const PIPE_DEV: DeviceId = DeviceId::new(VIRT_MAJOR, 0);

/// Native name of an anonymous pipe.
#[must_use]
pub fn pipe_name(pid: u32, id: u64) -> String {
    format!("\\\\.\\pipe\\ntposix-{pid}-pipe-nt-{id:#x}")
}

/// Identifier shared by both ends; also the inode number.
#[must_use]
pub fn pipe_uid(pid: u32, id: u64) -> u64 {
    (id << 32) | u64::from(pid)
}

fn mutex_name(side: PipeSide, uid: u64) -> String {
    let dir = match side {
        PipeSide::Read => "input",
        PipeSide::Write => "output",
    };
    format!("ntposix.pipe.{dir}.mutex.{uid}")
}

fn select_name(uid: u64) -> String {
    format!("ntposix.pipe.select.{uid}")
}

/// Holds the per-end mutex for the duration of one transfer.
struct IoGuard(Option<Arc<KernelObject>>);

impl Drop for IoGuard {
    fn drop(&mut self) {
        if let Some(object) = &self.0 {
            if let Ok(mutex) = object.as_mutex() {
                let _ = mutex.release();
            }
        }
    }
}

/// One end of a pipe or FIFO.
pub struct PipeHandler {
    base: FhBase,
    side: PipeSide,
    /// Filesystem path for FIFOs.
    fifo: Option<String>,
    handle: NtHandle,
    io_mutex: Option<NtHandle>,
    select_sem: Option<NtHandle>,
}

impl PipeHandler {
    /// Create an anonymous pipe: `(read end, write end)`.
    ///
    /// `flags` may carry `O_NONBLOCK` and `O_CLOEXEC`.
    pub fn create_pair(env: &Arc<Env>, flags: i32) -> Result<(Arc<Self>, Arc<Self>), Errno> {
        let pid = env.pid();
        let id = env.kernel.next_object_id();
        let uid = pipe_uid(pid, id);
        let name = pipe_name(pid, id);
        let inherit = flags & O_CLOEXEC == 0;
        let (read, write) = env.kernel.create_pipe(
            &env.process,
            &name,
            env.config.pipe_buffer_size,
            inherit,
        )?;
        let sem = env.kernel.create_semaphore(
            &env.process,
            Some(&select_name(uid)),
            0,
            i32::MAX.unsigned_abs(),
            inherit,
        )?;
        let sem = NtHandle::new(sem);
        let end = |side: PipeSide, owned, mode: i32| -> Result<Arc<Self>, Errno> {
            let mutex = env
                .kernel
                .create_mutex(&env.process, Some(&mutex_name(side, uid)), false)?;
            let base = FhBase::new(
                env,
                DeviceClass::Pipe,
                PIPE_DEV,
                &name,
                mode | (flags & O_NONBLOCK),
            )
            .with_ino(uid);
            Ok(Arc::new(Self {
                base,
                side,
                fifo: None,
                handle: NtHandle::new(owned),
                io_mutex: Some(NtHandle::new(mutex)),
                select_sem: Some(sem.duplicate(inherit)?),
            }))
        };
        let read = end(PipeSide::Read, read, O_RDONLY)?;
        let write = end(PipeSide::Write, write, O_WRONLY)?;
        sem.close();
        log::debug!("pid {pid}: created pipe {name}");
        Ok((read, write))
    }

    /// An unopened FIFO end; [`Fhandler::open`] attaches it.
    #[must_use]
    pub fn fifo(env: &Arc<Env>, path: &str, flags: i32) -> Self {
        let side = if access_mode(flags) == O_WRONLY {
            PipeSide::Write
        } else {
            PipeSide::Read
        };
        Self {
            base: FhBase::new(env, DeviceClass::Fifo, PIPE_DEV, path, flags),
            side,
            fifo: Some(path.to_owned()),
            handle: NtHandle::empty(),
            io_mutex: None,
            select_sem: None,
        }
    }

    #[must_use]
    pub fn side(&self) -> PipeSide {
        self.side
    }

    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.fifo.is_some()
    }

    /// Raw value of the native pipe handle.
    #[must_use]
    pub fn raw_handle(&self) -> Option<u64> {
        self.handle.raw().map(|raw| raw.0)
    }

    fn with_end<T>(&self, f: impl FnOnce(&PipeEnd) -> Result<T, Errno>) -> Result<T, Errno> {
        let object = self.handle.object()?;
        f(object.as_pipe()?)
    }

    fn lock_io(&self) -> Result<IoGuard, Errno> {
        let Some(mutex) = &self.io_mutex else {
            return Ok(IoGuard(None));
        };
        let object = mutex.object()?;
        let env = self.base.env();
        let timeout = self.base.nonblocking().then_some(Duration::ZERO);
        match wait_for(object.as_waitable()?, timeout, env.wait_slice(), &|| {
            env.interrupted()
        }) {
            WaitStatus::Acquired => Ok(IoGuard(Some(object))),
            WaitStatus::TimedOut => Err(Errno::EAGAIN),
            WaitStatus::Interrupted => Err(Errno::EINTR),
        }
    }

    /// Release the select semaphore once per parked waiter.
    fn wake_peers(&self) {
        let Some(sem) = &self.select_sem else {
            return;
        };
        if let Ok(object) = sem.object() {
            if let Ok(sem) = object.as_semaphore() {
                sem.release_waiters();
            }
        }
    }

    fn park(&self) {
        self.wait_source().park(self.base.env().wait_slice());
    }

    fn broken(&self) -> Errno {
        log::debug!("{}: no reader left", self.base.name());
        let _ = self.base.env().signals.raise(SIGPIPE);
        Errno::EPIPE
    }

    fn reader_available(&self) -> Result<usize, Errno> {
        self.with_end(|end| Ok(end.query_local().read_data_available))
    }

    fn copy_with(
        &self,
        base: FhBase,
        handle: NtHandle,
        io_mutex: Option<NtHandle>,
        select_sem: Option<NtHandle>,
    ) -> Self {
        Self {
            base,
            side: self.side,
            fifo: self.fifo.clone(),
            handle,
            io_mutex,
            select_sem,
        }
    }
}

impl Fhandler for PipeHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    /// Attach a FIFO end. A writer waits for a reader unless non-blocking,
    /// in which case the open fails with `ENXIO`.
    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let Some(path) = &self.fifo else {
            return Ok(());
        };
        if flags & O_ACCMODE == O_RDWR {
            return Err(Errno::EINVAL);
        }
        let env = self.base.env();
        let shared = env.kernel.fifo(path).ok_or(Errno::ENOENT)?;
        if self.side == PipeSide::Write {
            while shared.readers() == 0 {
                if flags & O_NONBLOCK != 0 {
                    return Err(Errno::ENXIO);
                }
                if env.interrupted() {
                    return Err(Errno::EINTR);
                }
                shared.wait_change(env.wait_slice());
            }
        }
        let owned = env
            .kernel
            .open_fifo(&env.process, path, self.side, flags & O_CLOEXEC == 0)?;
        self.handle.bind(owned);
        log::debug!("{path}: fifo opened for {:?}", self.side);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if self.side != PipeSide::Read {
            return Err(Errno::EBADF);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock_io()?;
        let object = self.handle.object()?;
        let end = object.as_pipe()?;
        let env = self.base.env();
        loop {
            match end.read(buf) {
                Ok(n) => {
                    self.wake_peers();
                    return Ok(n);
                }
                Err(s) if s == NtStatus::PIPE_BROKEN => {
                    // A FIFO nobody has written to yet is empty, not at EOF.
                    let listening = self.is_fifo()
                        && end.query_local().state == NamedPipeState::Listening;
                    if !listening {
                        return Ok(0);
                    }
                }
                Err(s) if s == NtStatus::PIPE_EMPTY => {}
                Err(s) => return Err(s.into()),
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            self.park();
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, Errno> {
        if self.side != PipeSide::Write {
            return Err(Errno::EBADF);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock_io()?;
        let object = self.handle.object()?;
        let end = object.as_pipe()?;
        let env = self.base.env();
        let atomic = data.len() <= PIPE_BUF;
        let mut done = 0;
        loop {
            let info = end.query_local();
            if info.state != NamedPipeState::Connected {
                return if done > 0 { Ok(done) } else { Err(self.broken()) };
            }
            let want = data.len() - done;
            let chunk = if atomic {
                if info.write_quota_available >= want { want } else { 0 }
            } else {
                want.min(info.write_quota_available)
            };
            if chunk > 0 {
                match end.write(&data[done..done + chunk]) {
                    Ok(n) => {
                        done += n;
                        self.wake_peers();
                    }
                    Err(s) if s == NtStatus::PIPE_CLOSING => {
                        return if done > 0 { Ok(done) } else { Err(self.broken()) };
                    }
                    Err(s) => return if done > 0 { Ok(done) } else { Err(s.into()) },
                }
                if done == data.len() {
                    return Ok(done);
                }
                continue;
            }
            if self.base.nonblocking() {
                return if done > 0 { Ok(done) } else { Err(Errno::EAGAIN) };
            }
            if env.interrupted() {
                return if done > 0 { Ok(done) } else { Err(Errno::EINTR) };
            }
            self.park();
        }
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        if cmd != FIONREAD {
            return self.base.ioctl(cmd, &arg);
        }
        if self.side != PipeSide::Read {
            return Err(Errno::EINVAL);
        }
        let IoctlArg::IntOut(out) = arg else {
            return Err(Errno::EINVAL);
        };
        *out = i64::try_from(self.reader_available()?).unwrap_or(i64::MAX);
        Ok(0)
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let mut st = self.base.stat();
        if self.side == PipeSide::Read {
            st.st_size = i64::try_from(self.reader_available()?).unwrap_or(i64::MAX);
        }
        st.st_blksize = i64::try_from(PIPE_BUF).unwrap_or(4096);
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        self.handle.close();
        if let Some(mutex) = &self.io_mutex {
            mutex.close();
        }
        // Waiters re-check and see the new connection state.
        self.wake_peers();
        if let Some(sem) = &self.select_sem {
            sem.close();
        }
        log::trace!("{}: {:?} end closed", self.base.name(), self.side);
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(self.copy_with(
            self.base.dup_copy(),
            self.handle.duplicate(true)?,
            self.io_mutex.as_ref().map(|m| m.duplicate(false)).transpose()?,
            self.select_sem.as_ref().map(|s| s.duplicate(true)).transpose()?,
        )))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let process = &child.process;
        Ok(Arc::new(self.copy_with(
            self.base.copy_for(child),
            self.handle.fork_copy(process)?,
            self.io_mutex.as_ref().map(|m| m.fork_copy(process)).transpose()?,
            self.select_sem.as_ref().map(|s| s.fork_copy(process)).transpose()?,
        )))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)?;
        for extra in [&self.io_mutex, &self.select_sem].into_iter().flatten() {
            extra.fixup_after_fork(parent)?;
        }
        Ok(())
    }

    /// The io mutex is never inherited, so only the pipe and semaphore flip.
    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)?;
        if let Some(sem) = &self.select_sem {
            sem.set_inherit(!cloexec)?;
        }
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        let Ok(info) = self.with_end(|end| Ok(end.query_local())) else {
            return Readiness {
                error: true,
                ..Readiness::default()
            };
        };
        let closing = info.state == NamedPipeState::Closing;
        match self.side {
            PipeSide::Read => Readiness {
                readable: info.read_data_available > 0 || closing,
                hangup: closing,
                ..Readiness::default()
            },
            PipeSide::Write => Readiness {
                writable: info.state == NamedPipeState::Connected
                    && info.write_quota_available >= PIPE_BUF.min(info.capacity),
                error: closing,
                ..Readiness::default()
            },
        }
    }

    fn wait_source(&self) -> WaitSource {
        if let Some(object) = self.select_sem.as_ref().and_then(|s| s.object().ok()) {
            return WaitSource::Object(object);
        }
        match self.handle.object() {
            Ok(object) => match object.as_pipe() {
                Ok(end) => WaitSource::Pipe(Arc::clone(end.shared())),
                Err(_) => WaitSource::Poll,
            },
            Err(_) => WaitSource::Poll,
        }
    }

    /// Reopen through `/proc/<pid>/fd`: only the direction this end
    /// supports is allowed.
    fn reopen(&self, flags: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        let mode = access_mode(flags);
        let allowed = match self.side {
            PipeSide::Read => mode == O_RDONLY,
            PipeSide::Write => mode == O_WRONLY,
        };
        if !allowed {
            return Err(Errno::EACCES);
        }
        let inherit = flags & O_CLOEXEC == 0;
        let base = FhBase::new(
            self.base.env(),
            self.base.class(),
            PIPE_DEV,
            self.base.name(),
            flags & !O_CLOEXEC,
        )
        .with_ino(self.base.ino());
        Ok(Arc::new(self.copy_with(
            base,
            self.handle.duplicate(inherit)?,
            self.io_mutex.as_ref().map(|m| m.duplicate(false)).transpose()?,
            self.select_sem.as_ref().map(|s| s.duplicate(inherit)).transpose()?,
        )))
    }

    fn proc_name(&self) -> String {
        match &self.fifo {
            Some(path) => path.clone(),
            None => format!("pipe:[{}]", self.base.ino()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::signal::Disposition;
    use crate::testing::TestRig;

    fn pair(rig: &TestRig, flags: i32) -> (Arc<PipeHandler>, Arc<PipeHandler>) {
        PipeHandler::create_pair(rig.env(), flags).unwrap()
    }

    #[test]
    fn data_then_eof_after_writer_closes() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, 0);
        assert_eq!(w.write(b"hello").unwrap(), 5);
        w.close().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn nonblocking_read_of_empty_pipe() {
        let rig = TestRig::new().build();
        let (r, _w) = pair(&rig, O_NONBLOCK);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Err(Errno::EAGAIN));
        assert!(!r.readiness().readable);
    }

    #[test]
    fn small_writes_are_all_or_nothing() {
        let rig = TestRig::new().build();
        let (_r, w) = pair(&rig, O_NONBLOCK);
        let cap = rig.env().config.pipe_buffer_size;
        let fill = vec![7u8; cap - 100];
        assert_eq!(w.write(&fill).unwrap(), cap - 100);
        assert_eq!(w.write(&[1u8; 200]), Err(Errno::EAGAIN));
        assert_eq!(w.write(&[1u8; 100]).unwrap(), 100);
        assert!(!w.readiness().writable);
    }

    #[test]
    fn large_nonblocking_write_is_short() {
        let rig = TestRig::new().build();
        let (_r, w) = pair(&rig, O_NONBLOCK);
        let cap = rig.env().config.pipe_buffer_size;
        let big = vec![3u8; cap + PIPE_BUF * 2];
        assert_eq!(w.write(&big).unwrap(), cap);
    }

    #[test]
    fn write_without_reader_raises_sigpipe() {
        let rig = TestRig::new().build();
        let env = rig.env();
        env.signals.set_disposition(SIGPIPE, Disposition::Catch).unwrap();
        let (r, w) = pair(&rig, 0);
        r.close().unwrap();
        assert_eq!(w.write(b"x"), Err(Errno::EPIPE));
        assert!(env.signals.is_pending(SIGPIPE));
        assert!(w.readiness().error);
    }

    #[test]
    fn blocked_reader_is_woken_by_writer() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, 0);
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = r.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });
        thread::sleep(Duration::from_millis(30));
        w.write(b"ping").unwrap();
        assert_eq!(reader.join().unwrap(), b"ping");
    }

    #[test]
    fn pending_signal_interrupts_blocked_read() {
        let rig = TestRig::new().build();
        let env = rig.env();
        env.signals.set_disposition(crate::signal::SIGUSR1, Disposition::Catch).unwrap();
        let (r, _w) = pair(&rig, 0);
        env.signals.raise(crate::signal::SIGUSR1).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Err(Errno::EINTR));
    }

    #[test]
    fn signal_after_partial_write_returns_the_count() {
        let rig = TestRig::new().build();
        let env = Arc::clone(rig.env());
        env.signals.set_disposition(crate::signal::SIGUSR1, Disposition::Catch).unwrap();
        let (r, w) = pair(&rig, 0);
        let cap = env.config.pipe_buffer_size;
        let len = cap + PIPE_BUF * 2;
        let writer = thread::spawn(move || w.write(&vec![5u8; len]));
        while r.reader_available().unwrap() < cap {
            thread::sleep(Duration::from_millis(5));
        }
        let mut buf = vec![0u8; PIPE_BUF];
        assert_eq!(r.read(&mut buf).unwrap(), PIPE_BUF);
        thread::sleep(Duration::from_millis(30));
        env.signals.raise(crate::signal::SIGUSR1).unwrap();
        let n = writer.join().unwrap().unwrap();
        assert!(n >= cap && n < len, "wrote {n} of {len}");
    }

    #[test]
    fn concurrent_atomic_writes_do_not_interleave() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, 0);
        let writers: Vec<_> = (0u8..4)
            .map(|tag| {
                let w = Arc::clone(&w);
                thread::spawn(move || {
                    for _ in 0..8 {
                        w.write(&[tag; 512]).unwrap();
                    }
                })
            })
            .collect();
        let mut got = Vec::new();
        let mut buf = [0u8; 512];
        while got.len() < 4 * 8 * 512 {
            let n = r.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        for h in writers {
            h.join().unwrap();
        }
        for record in got.chunks(512) {
            assert!(record.iter().all(|b| *b == record[0]));
        }
    }

    #[test]
    fn dup_keeps_the_write_end_alive() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, O_NONBLOCK);
        let w2 = Arc::clone(&w).dup().unwrap();
        w.close().unwrap();
        assert_eq!(w2.write(b"ok").unwrap(), 2);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 2);
        assert_eq!(r.read(&mut buf), Err(Errno::EAGAIN));
        w2.close().unwrap();
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert!(r.readiness().hangup);
    }

    #[test]
    fn stat_and_fionread_report_queued_bytes() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, 0);
        w.write(b"abc").unwrap();
        let mut n = 0i64;
        r.ioctl(FIONREAD, IoctlArg::IntOut(&mut n)).unwrap();
        assert_eq!(n, 3);
        let st = r.fstat().unwrap();
        assert_eq!(st.st_size, 3);
        assert_eq!(st.file_type(), crate::flags::S_IFIFO);
        assert_eq!(st.st_ino, w.fstat().unwrap().st_ino);
        assert_eq!(r.proc_name(), format!("pipe:[{}]", st.st_ino));
    }

    #[test]
    fn reopen_checks_direction() {
        let rig = TestRig::new().build();
        let (r, w) = pair(&rig, 0);
        assert_eq!(r.reopen(O_WRONLY).err(), Some(Errno::EACCES));
        assert_eq!(w.reopen(O_RDWR).err(), Some(Errno::EACCES));
        let w2 = w.reopen(O_WRONLY).unwrap();
        assert_eq!(w2.write(b"z").unwrap(), 1);
        let mut buf = [0u8; 1];
        assert_eq!(r.read(&mut buf).unwrap(), 1);
    }

    // -----------------------------------------------------------------------
    // FIFOs
    // -----------------------------------------------------------------------

    #[test]
    fn fifo_open_rules() {
        let rig = TestRig::new().build();
        let env = rig.env();
        env.kernel.create_fifo("/tmp/f", 65536).unwrap();
        let rdwr = PipeHandler::fifo(env, "/tmp/f", O_RDWR);
        assert_eq!(rdwr.open(O_RDWR, 0), Err(Errno::EINVAL));
        let w = PipeHandler::fifo(env, "/tmp/f", O_WRONLY | O_NONBLOCK);
        assert_eq!(w.open(O_WRONLY | O_NONBLOCK, 0), Err(Errno::ENXIO));
        let missing = PipeHandler::fifo(env, "/tmp/nope", O_RDONLY);
        assert_eq!(missing.open(O_RDONLY, 0), Err(Errno::ENOENT));
    }

    #[test]
    fn fifo_reader_then_writer() {
        let rig = TestRig::new().build();
        let env = rig.env();
        env.kernel.create_fifo("/tmp/g", 65536).unwrap();
        let r = PipeHandler::fifo(env, "/tmp/g", O_RDONLY | O_NONBLOCK);
        r.open(O_RDONLY | O_NONBLOCK, 0).unwrap();
        let mut buf = [0u8; 8];
        // Nobody has written yet: empty, not EOF.
        assert_eq!(r.read(&mut buf), Err(Errno::EAGAIN));
        let w = PipeHandler::fifo(env, "/tmp/g", O_WRONLY);
        w.open(O_WRONLY, 0).unwrap();
        assert_eq!(w.write(b"fifo").unwrap(), 4);
        assert_eq!(r.read(&mut buf).unwrap(), 4);
        w.close().unwrap();
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(r.proc_name(), "/tmp/g");
    }
}
