//! Local stream sockets created by `socketpair`.
//!
//! Each socket owns the read end of one pipe and the write end of the
//! other, so the pair is full duplex. `shutdown` closes one direction
//! early: the peer sees end of file on read, and writing after a write
//! shutdown raises `SIGPIPE` like a broken pipe.

use std::sync::Arc;

use ntposix_native::Process;
use parking_lot::Mutex;

use crate::device::{DeviceClass, DeviceId, VIRT_MAJOR};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::pipe::PipeHandler;
use crate::fhandler::{FhBase, Fhandler, Readiness, WaitSource};
use crate::flags::{O_CLOEXEC, O_NONBLOCK, O_RDWR, Stat};
use crate::ioctl::{FIONREAD, IoctlArg};
use crate::signal::SIGPIPE;

pub const AF_UNIX: i32 = 1;
pub const AF_LOCAL: i32 = AF_UNIX;
pub const AF_INET: i32 = 2;
pub const SOCK_STREAM: i32 = 1;
pub const SOCK_DGRAM: i32 = 2;
pub const SOCK_NONBLOCK: i32 = O_NONBLOCK;
pub const SOCK_CLOEXEC: i32 = O_CLOEXEC;

pub const SHUT_RD: i32 = 0;
pub const SHUT_WR: i32 = 1;
pub const SHUT_RDWR: i32 = 2;

pub const SOCKET_DEV: DeviceId = DeviceId::new(VIRT_MAJOR, 4);

type Half = Mutex<Option<Arc<dyn Fhandler>>>;

pub struct SocketHandler {
    base: FhBase,
    rx: Half,
    tx: Half,
}

impl SocketHandler {
    /// `socketpair(domain, type, protocol)`. `kind` may carry
    /// `SOCK_NONBLOCK` and `SOCK_CLOEXEC`.
    pub fn pair(
        env: &Arc<Env>,
        domain: i32,
        kind: i32,
        protocol: i32,
    ) -> Result<(Arc<Self>, Arc<Self>), Errno> {
        if domain != AF_UNIX {
            return Err(Errno::EAFNOSUPPORT);
        }
        if protocol != 0 {
            return Err(Errno::EPROTONOSUPPORT);
        }
        let extra = kind & (SOCK_NONBLOCK | SOCK_CLOEXEC);
        if kind & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != SOCK_STREAM {
            return Err(Errno::EOPNOTSUPP);
        }
        let (a_read, a_write) = PipeHandler::create_pair(env, extra)?;
        let (b_read, b_write) = PipeHandler::create_pair(env, extra)?;
        let ino = a_read.base().ino();
        let socket = |rx: Arc<PipeHandler>, tx: Arc<PipeHandler>| {
            let base = FhBase::new(
                env,
                DeviceClass::Socket,
                SOCKET_DEV,
                &format!("socket:[{ino}]"),
                O_RDWR | (extra & O_NONBLOCK),
            )
            .with_ino(ino);
            Arc::new(Self {
                base,
                rx: Mutex::new(Some(rx as Arc<dyn Fhandler>)),
                tx: Mutex::new(Some(tx as Arc<dyn Fhandler>)),
            })
        };
        log::debug!("pid {}: socketpair socket:[{ino}]", env.pid());
        Ok((socket(a_read, b_write), socket(b_read, a_write)))
    }

    /// The half, with its non-blocking flag following the socket's.
    fn half(&self, half: &Half) -> Option<Arc<dyn Fhandler>> {
        let fh = half.lock().clone()?;
        fh.base().set_nonblocking(self.base.nonblocking());
        Some(fh)
    }

    fn copy_halves(
        &self,
        base: FhBase,
        copy: impl Fn(&Arc<dyn Fhandler>) -> Result<Arc<dyn Fhandler>, Errno>,
    ) -> Result<Self, Errno> {
        let rx = self.rx.lock().as_ref().map(&copy).transpose()?;
        let tx = self.tx.lock().as_ref().map(&copy).transpose()?;
        Ok(Self {
            base,
            rx: Mutex::new(rx),
            tx: Mutex::new(tx),
        })
    }

    fn close_half(half: &Half) -> Result<(), Errno> {
        match half.lock().take() {
            Some(fh) => fh.close(),
            None => Ok(()),
        }
    }
}

impl Fhandler for SocketHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        match self.half(&self.rx) {
            Some(rx) => rx.read(buf),
            None => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        match self.half(&self.tx) {
            Some(tx) => tx.write(buf),
            None => {
                let _ = self.base.env().signals.raise(SIGPIPE);
                Err(Errno::EPIPE)
            }
        }
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        if cmd == FIONREAD {
            return match self.half(&self.rx) {
                Some(rx) => rx.ioctl(cmd, arg),
                None => match arg {
                    IoctlArg::IntOut(out) => {
                        *out = 0;
                        Ok(0)
                    }
                    _ => Err(Errno::EINVAL),
                },
            };
        }
        self.base.ioctl(cmd, &arg)
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let mut st = self.base.stat();
        st.st_size = 0;
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        let rx = Self::close_half(&self.rx);
        let tx = Self::close_half(&self.tx);
        rx.and(tx)
    }

    fn shutdown(&self, how: i32) -> Result<(), Errno> {
        log::debug!("{}: shutdown {how}", self.base.name());
        match how {
            SHUT_RD => Self::close_half(&self.rx),
            SHUT_WR => Self::close_half(&self.tx),
            SHUT_RDWR => {
                let rx = Self::close_half(&self.rx);
                Self::close_half(&self.tx).and(rx)
            }
            _ => Err(Errno::EINVAL),
        }
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(
            self.copy_halves(self.base.dup_copy(), |fh| Arc::clone(fh).dup())?,
        ))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(
            self.copy_halves(self.base.copy_for(child), |fh| fh.fork_copy(child))?,
        ))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        for half in [&self.rx, &self.tx] {
            if let Some(fh) = half.lock().as_ref() {
                fh.fixup_after_fork(parent)?;
            }
        }
        Ok(())
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        for half in [&self.rx, &self.tx] {
            if let Some(fh) = half.lock().as_ref() {
                fh.set_close_on_exec(cloexec)?;
            }
        }
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        let rx = self.rx.lock().as_ref().map(|fh| fh.readiness());
        let tx = self.tx.lock().as_ref().map(|fh| fh.readiness());
        Readiness {
            // A shut-down read side reads end of file at once.
            readable: rx.is_none_or(|r| r.readable),
            writable: tx.is_some_and(|w| w.writable),
            hangup: rx.is_some_and(|r| r.hangup),
            error: tx.is_some_and(|w| w.error),
        }
    }

    fn wait_source(&self) -> WaitSource {
        self.rx
            .lock()
            .as_ref()
            .map_or(WaitSource::Poll, |fh| fh.wait_source())
    }

    fn proc_name(&self) -> String {
        self.base.name().to_owned()
    }
}
