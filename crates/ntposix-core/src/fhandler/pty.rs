//! Pseudo-terminals: `/dev/ptmx` allocates one, `/dev/tty<N>` is its slave.
//!
//! Bytes the master writes go through the pty's [`LineDiscipline`] before
//! the slave can read them; echo and slave output come back to the master
//! post-processed. Terminal attributes and the window size live with the
//! pty, so every handle on either side sees the same ones. Like the console,
//! a slave is the archetype for its device within a process.
//!
//! The master reads end of file once a slave was opened and none is left.
//! After the master is gone, slave reads return end of file and writes fail
//! with `EIO`.

use std::any::Any;
use std::sync::{Arc, Weak};

use ntposix_native::Process;
use ntposix_native::pty::{Pty, PtySide};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle, Readiness};
use crate::flags::O_CLOEXEC;
use crate::ioctl::{
    FIONREAD, IoctlArg, TCFLSH, TCGETS, TCSBRK, TCSETS, TCSETSF, TCSETSW, TIOCGPTN, TIOCGWINSZ,
    TIOCSWINSZ,
};
use crate::signal::SIGWINCH;
use crate::termios::{
    LineDiscipline, TCIFLUSH, TCIOFLUSH, TCOFLUSH, Termios, Winsize, process_output,
};

/// Terminal state shared by both sides of one pty.
#[derive(Debug)]
struct TtyState {
    tio: Termios,
    ld: LineDiscipline,
    winsize: Winsize,
    /// Process that last opened the slave; keyboard signals go there.
    foreground: Weak<Env>,
}

impl Default for TtyState {
    fn default() -> Self {
        Self {
            tio: Termios::default(),
            ld: LineDiscipline::new(),
            winsize: Winsize {
                ws_row: 24,
                ws_col: 80,
                ws_xpixel: 0,
                ws_ypixel: 0,
            },
            foreground: Weak::new(),
        }
    }
}

/// A pty together with its terminal state.
struct Tty {
    pty: Arc<Pty>,
    state: Arc<Mutex<TtyState>>,
}

impl Tty {
    fn of(handle: &NtHandle) -> Result<Self, Errno> {
        let object = handle.object()?;
        let pty = Arc::clone(object.as_pty()?.pty());
        let any = pty.attachment(|| {
            let fresh: Arc<dyn Any + Send + Sync> = Arc::new(Mutex::new(TtyState::default()));
            fresh
        });
        let state = any
            .downcast::<Mutex<TtyState>>()
            .map_err(|_| Errno::EIO)?;
        Ok(Self { pty, state })
    }

    /// Run what the master wrote through the line discipline.
    fn pump(&self, st: &mut TtyState) {
        let mut keys = [0u8; 64];
        loop {
            let n = self.pty.pull(PtySide::Slave, &mut keys);
            if n == 0 {
                break;
            }
            for &key in &keys[..n] {
                let tio = st.tio;
                let effect = st.ld.input(&tio, key);
                if !effect.echo.is_empty() {
                    self.pty
                        .push(PtySide::Master, &process_output(&tio, &effect.echo));
                }
                if let Some(sig) = effect.signal {
                    if let Some(env) = st.foreground.upgrade() {
                        log::debug!("pty {}: signal {sig} to pid {}", self.pty.index(), env.pid());
                        let _ = env.signals.raise(sig);
                    }
                }
            }
        }
    }

    fn flush(&self, queue: i64) -> Result<(), Errno> {
        match queue {
            TCIFLUSH => {
                self.pty.discard(PtySide::Slave);
                self.state.lock().ld.flush();
            }
            TCOFLUSH => self.pty.discard(PtySide::Master),
            TCIOFLUSH => {
                self.flush(TCIFLUSH)?;
                self.flush(TCOFLUSH)?;
            }
            _ => return Err(Errno::EINVAL),
        }
        Ok(())
    }

    /// Requests both sides answer the same way. `None` for anything else.
    fn ioctl(&self, cmd: u64, arg: &mut IoctlArg<'_>) -> Option<Result<i64, Errno>> {
        let result = match (cmd, arg) {
            (TCGETS, IoctlArg::Termios(tio)) => {
                **tio = self.state.lock().tio;
                Ok(0)
            }
            // Output reaches the master without queueing, so there is
            // nothing to drain.
            (TCSETS | TCSETSW, IoctlArg::Termios(tio)) => {
                self.state.lock().tio = **tio;
                Ok(0)
            }
            (TCSETSF, IoctlArg::Termios(tio)) => self.flush(TCIFLUSH).map(|()| {
                self.state.lock().tio = **tio;
                0
            }),
            (TCFLSH, arg) => match arg.int_value() {
                Some(queue) => self.flush(queue).map(|()| 0),
                None => Err(Errno::EINVAL),
            },
            (TIOCGWINSZ, IoctlArg::Winsize(ws)) => {
                **ws = self.state.lock().winsize;
                Ok(0)
            }
            (TIOCSWINSZ, IoctlArg::Winsize(ws)) => {
                let mut st = self.state.lock();
                let changed = st.winsize != **ws;
                st.winsize = **ws;
                let target = st.foreground.upgrade();
                drop(st);
                if let Some(env) = target.filter(|_| changed) {
                    let _ = env.signals.raise(SIGWINCH);
                }
                Ok(0)
            }
            // No output queue to drain and no line to break.
            (TCSBRK, _) => Ok(0),
            (TIOCGPTN, IoctlArg::IntOut(out)) => {
                **out = i64::from(self.pty.index());
                Ok(0)
            }
            (TCGETS | TCSETS | TCSETSW | TCSETSF | TIOCGWINSZ | TIOCSWINSZ | TIOCGPTN, _) => {
                Err(Errno::EINVAL)
            }
            _ => return None,
        };
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// Master
// ---------------------------------------------------------------------------

pub struct PtyMasterHandler {
    base: FhBase,
    handle: NtHandle,
}

impl PtyMasterHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, flags: i32) -> Self {
        Self {
            base: FhBase::new(
                env,
                DeviceClass::PtyMaster,
                DevicePath::Ptmx.device_id(),
                name,
                flags,
            ),
            handle: NtHandle::empty(),
        }
    }

    /// Index of the allocated pty; its slave is `/dev/tty<index>`.
    pub fn index(&self) -> Result<u32, Errno> {
        Ok(Tty::of(&self.handle)?.pty.index())
    }
}

impl Fhandler for PtyMasterHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let env = self.base.env();
        let (pty, owned) = env.kernel.create_pty(&env.process, flags & O_CLOEXEC == 0);
        self.handle.bind(owned);
        log::debug!("pid {}: allocated /dev/tty{}", env.pid(), pty.index());
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let tty = Tty::of(&self.handle)?;
        let env = self.base.env();
        loop {
            let n = tty.pty.pull(PtySide::Master, buf);
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            if tty.pty.slave_hung_up() {
                return Ok(0);
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            tty.pty.wait(env.wait_slice());
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let tty = Tty::of(&self.handle)?;
        tty.pty.push(PtySide::Slave, buf);
        tty.pump(&mut tty.state.lock());
        Ok(buf.len())
    }

    fn ioctl(&self, cmd: u64, mut arg: IoctlArg<'_>) -> Result<i64, Errno> {
        let tty = Tty::of(&self.handle)?;
        if let Some(result) = tty.ioctl(cmd, &mut arg) {
            return result;
        }
        match (cmd, arg) {
            (FIONREAD, IoctlArg::IntOut(out)) => {
                *out = i64::try_from(tty.pty.queued(PtySide::Master)).unwrap_or(i64::MAX);
                Ok(0)
            }
            (FIONREAD, _) => Err(Errno::EINVAL),
            (cmd, arg) => self.base.ioctl(cmd, &arg),
        }
    }

    fn close(&self) -> Result<(), Errno> {
        self.handle.close();
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            handle: self.handle.duplicate(true)?,
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            handle: self.handle.fork_copy(&child.process)?,
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }

    fn readiness(&self) -> Readiness {
        let Ok(tty) = Tty::of(&self.handle) else {
            return Readiness {
                error: true,
                ..Readiness::default()
            };
        };
        let hangup = tty.pty.slave_hung_up();
        Readiness {
            readable: tty.pty.queued(PtySide::Master) > 0 || hangup,
            writable: true,
            hangup,
            error: false,
        }
    }

    fn is_tty(&self) -> bool {
        true
    }

    fn proc_name(&self) -> String {
        "/dev/ptmx".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Slave
// ---------------------------------------------------------------------------

pub struct PtySlaveHandler {
    base: FhBase,
    index: u32,
    handle: NtHandle,
}

impl PtySlaveHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, index: u32, flags: i32) -> Self {
        Self {
            base: FhBase::new(
                env,
                DeviceClass::PtySlave,
                DevicePath::PtySlave { index }.device_id(),
                name,
                flags,
            ),
            index,
            handle: NtHandle::empty(),
        }
    }
}

impl Fhandler for PtySlaveHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let env = self.base.env();
        let owned = env
            .kernel
            .open_pty_slave(&env.process, self.index, flags & O_CLOEXEC == 0)?;
        self.handle.bind(owned);
        let tty = Tty::of(&self.handle)?;
        tty.state.lock().foreground = Arc::downgrade(env);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let tty = Tty::of(&self.handle)?;
        let env = self.base.env();
        loop {
            {
                let mut st = tty.state.lock();
                tty.pump(&mut st);
                let tio = st.tio;
                if let Some(n) = st.ld.read(&tio, buf) {
                    return Ok(n);
                }
            }
            if !tty.pty.master_open() {
                return Ok(0);
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            tty.pty.wait(env.wait_slice());
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let tty = Tty::of(&self.handle)?;
        let env = self.base.env();
        loop {
            if !tty.pty.master_open() {
                return Err(Errno::EIO);
            }
            {
                let mut st = tty.state.lock();
                tty.pump(&mut st);
                if !st.ld.is_stopped() {
                    let out = process_output(&st.tio, buf);
                    tty.pty.push(PtySide::Master, &out);
                    return Ok(buf.len());
                }
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            tty.pty.wait(env.wait_slice());
        }
    }

    fn ioctl(&self, cmd: u64, mut arg: IoctlArg<'_>) -> Result<i64, Errno> {
        let tty = Tty::of(&self.handle)?;
        if let Some(result) = tty.ioctl(cmd, &mut arg) {
            return result;
        }
        match (cmd, arg) {
            (FIONREAD, IoctlArg::IntOut(out)) => {
                let mut st = tty.state.lock();
                tty.pump(&mut st);
                *out = i64::try_from(st.ld.available()).unwrap_or(i64::MAX);
                Ok(0)
            }
            (FIONREAD, _) => Err(Errno::EINVAL),
            (cmd, arg) => self.base.ioctl(cmd, &arg),
        }
    }

    fn close(&self) -> Result<(), Errno> {
        log::trace!("{}: last reference closed", self.base.name());
        self.handle.close();
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        self.base.add_ref();
        Ok(self)
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            index: self.index,
            handle: self.handle.fork_copy(&child.process)?,
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }

    fn readiness(&self) -> Readiness {
        let Ok(tty) = Tty::of(&self.handle) else {
            return Readiness {
                error: true,
                ..Readiness::default()
            };
        };
        let master = tty.pty.master_open();
        let mut st = tty.state.lock();
        tty.pump(&mut st);
        Readiness {
            readable: st.ld.readable(&st.tio) || !master,
            writable: master && !st.ld.is_stopped(),
            hangup: !master,
            error: false,
        }
    }

    fn is_tty(&self) -> bool {
        true
    }

    fn is_archetype(&self) -> bool {
        true
    }

    fn proc_name(&self) -> String {
        format!("/dev/tty{}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_NONBLOCK, O_RDWR};
    use crate::signal::SIGINT;
    use crate::testing::TestRig;

    fn master(rig: &TestRig, flags: i32) -> Arc<PtyMasterHandler> {
        let fh = PtyMasterHandler::new(rig.env(), "/dev/ptmx", flags);
        fh.open(flags, 0).unwrap();
        Arc::new(fh)
    }

    fn slave(rig: &TestRig, index: u32) -> Result<Arc<PtySlaveHandler>, Errno> {
        let fh = PtySlaveHandler::new(rig.env(), &format!("/dev/tty{index}"), index, O_RDWR);
        fh.open(O_RDWR, 0)?;
        Ok(Arc::new(fh))
    }

    fn drain(m: &PtyMasterHandler) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let mut avail = 0;
        m.ioctl(FIONREAD, IoctlArg::IntOut(&mut avail)).unwrap();
        if avail == 0 {
            return Vec::new();
        }
        let n = m.read(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn lines_cross_with_echo() {
        let rig = TestRig::new().build();
        let m = master(&rig, O_RDWR);
        let s = slave(&rig, m.index().unwrap()).unwrap();

        m.write(b"helo\x7flo\r").unwrap();
        let mut buf = [0u8; 32];
        let n = s.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\n");
        assert_eq!(drain(&m), b"helo\x08 \x08lo\r\n");

        s.write(b"out\n").unwrap();
        assert_eq!(drain(&m), b"out\r\n");
    }

    #[test]
    fn indices_and_ptn() {
        let rig = TestRig::new().build();
        let a = master(&rig, O_RDWR);
        let b = master(&rig, O_RDWR);
        let mut ptn = -1;
        b.ioctl(TIOCGPTN, IoctlArg::IntOut(&mut ptn)).unwrap();
        assert_eq!((a.index().unwrap(), ptn), (0, 1));
        assert_eq!(slave(&rig, 5).err(), Some(Errno::ENOENT));
    }

    #[test]
    fn master_reads_eof_once_the_last_slave_is_gone() {
        let rig = TestRig::new().build();
        let m = master(&rig, O_RDWR | O_NONBLOCK);
        let mut buf = [0u8; 8];
        // No slave yet: nothing to read, but not a hangup either.
        assert_eq!(m.read(&mut buf), Err(Errno::EAGAIN));
        assert!(!m.readiness().hangup);
        let s = slave(&rig, 0).unwrap();
        s.close().unwrap();
        drop(s);
        assert_eq!(m.read(&mut buf).unwrap(), 0);
        assert!(m.readiness().hangup);
    }

    #[test]
    fn slave_after_master_closes() {
        let rig = TestRig::new().build();
        let m = master(&rig, O_RDWR);
        let s = slave(&rig, 0).unwrap();
        m.close().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert_eq!(s.write(b"x"), Err(Errno::EIO));
        assert!(s.readiness().hangup);
        assert_eq!(slave(&rig, 0).err(), Some(Errno::EIO));
    }

    #[test]
    fn interrupt_from_the_master_signals_the_slave_process() {
        let rig = TestRig::new().build();
        let m = master(&rig, O_RDWR);
        let s = slave(&rig, 0).unwrap();
        m.write(b"abc\x03").unwrap();
        assert!(rig.env().signals.is_pending(SIGINT));
        assert_eq!(drain(&m), b"abc^C\r\n");
        let mut avail = 0;
        s.ioctl(FIONREAD, IoctlArg::IntOut(&mut avail)).unwrap();
        assert_eq!(avail, 0);
    }

    #[test]
    fn attributes_and_size_are_shared_by_both_sides() {
        let rig = TestRig::new().build();
        let m = master(&rig, O_RDWR);
        let s = slave(&rig, 0).unwrap();
        let mut tio = Termios::default();
        s.ioctl(TCGETS, IoctlArg::Termios(&mut tio)).unwrap();
        tio.make_raw();
        s.ioctl(TCSETS, IoctlArg::Termios(&mut tio)).unwrap();
        m.write(b"k").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 1);
        assert_eq!(drain(&m), b"");

        let mut ws = Winsize {
            ws_row: 50,
            ws_col: 132,
            ..Winsize::default()
        };
        m.ioctl(TIOCSWINSZ, IoctlArg::Winsize(&mut ws)).unwrap();
        assert!(rig.env().signals.is_pending(SIGWINCH));
        let mut seen = Winsize::default();
        s.ioctl(TIOCGWINSZ, IoctlArg::Winsize(&mut seen)).unwrap();
        assert_eq!((seen.ws_row, seen.ws_col), (50, 132));
    }

    #[test]
    fn slave_dup_aliases_the_archetype() {
        let rig = TestRig::new().build();
        let _m = master(&rig, O_RDWR);
        let s = slave(&rig, 0).unwrap();
        let alias = Arc::clone(&s).dup().unwrap();
        assert!(alias.is_archetype());
        assert_eq!(s.base().refs(), 2);
        assert_eq!(alias.proc_name(), "/dev/tty0");
    }
}
