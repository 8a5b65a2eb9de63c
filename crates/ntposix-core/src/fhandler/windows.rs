//! `/dev/windows`: the thread's window message queue as a file.
//!
//! Writes deliver one encoded message each, posted or sent depending on the
//! method selected with `ioctl`. Reads take the next queued message for the
//! selected window (any window when none is set).

use std::sync::Arc;

use ntposix_native::Process;
use ntposix_native::msgqueue::{MessageQueue, WindowMessage};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle, Readiness, WaitSource};
use crate::flags::O_CLOEXEC;
use crate::ioctl::{IoctlArg, WINDOWS_HWND, WINDOWS_POST, WINDOWS_SEND};

/// Encoded size of one message: hwnd, message, padding, wparam, lparam.
pub const MSG_SIZE: usize = 32;

/// Little-endian wire form of a message.
#[must_use]
pub fn encode_message(msg: &WindowMessage) -> [u8; MSG_SIZE] {
    let mut out = [0u8; MSG_SIZE];
    out[0..8].copy_from_slice(&msg.hwnd.to_le_bytes());
    out[8..12].copy_from_slice(&msg.message.to_le_bytes());
    out[16..24].copy_from_slice(&msg.wparam.to_le_bytes());
    out[24..32].copy_from_slice(&msg.lparam.to_le_bytes());
    out
}

pub fn decode_message(bytes: &[u8]) -> Result<WindowMessage, Errno> {
    let field = |range: std::ops::Range<usize>| bytes.get(range).ok_or(Errno::EINVAL);
    let u64_at = |start: usize| -> Result<u64, Errno> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(field(start..start + 8)?);
        Ok(u64::from_le_bytes(raw))
    };
    let mut message = [0u8; 4];
    message.copy_from_slice(field(8..12)?);
    Ok(WindowMessage {
        hwnd: u64_at(0)?,
        message: u32::from_le_bytes(message),
        wparam: u64_at(16)?,
        lparam: u64_at(24)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Post,
    Send,
}

#[derive(Debug, Clone, Copy)]
struct WinState {
    method: Method,
    /// Window reads are filtered on; 0 reads everything.
    hwnd: u64,
}

pub struct WindowsHandler {
    base: FhBase,
    handle: NtHandle,
    state: Mutex<WinState>,
}

impl WindowsHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, flags: i32) -> Self {
        Self {
            base: FhBase::new(
                env,
                DeviceClass::Windows,
                DevicePath::Windows.device_id(),
                name,
                flags,
            ),
            handle: NtHandle::empty(),
            state: Mutex::new(WinState {
                method: Method::Post,
                hwnd: 0,
            }),
        }
    }

    fn queue(&self) -> Result<Arc<MessageQueue>, Errno> {
        let object = self.handle.object()?;
        Ok(Arc::clone(object.as_message_queue()?))
    }

    fn deliver(&self, method: Method, msg: WindowMessage) -> Result<u64, Errno> {
        let queue = self.queue()?;
        match method {
            Method::Post => {
                queue.post(msg)?;
                Ok(0)
            }
            Method::Send => Ok(queue.send(msg)?),
        }
    }

    fn copy_with(&self, base: FhBase, handle: NtHandle) -> Self {
        Self {
            base,
            handle,
            state: Mutex::new(*self.state.lock()),
        }
    }
}

impl Fhandler for WindowsHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let env = self.base.env();
        let owned = env
            .kernel
            .open_message_queue(&env.process, flags & O_CLOEXEC == 0);
        self.handle.bind(owned);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        if buf.len() < MSG_SIZE {
            return Err(Errno::EINVAL);
        }
        let queue = self.queue()?;
        let env = self.base.env();
        loop {
            let hwnd = self.state.lock().hwnd;
            let filter = (hwnd != 0).then_some(hwnd);
            if let Some(msg) = queue.peek(filter, true) {
                buf[..MSG_SIZE].copy_from_slice(&encode_message(&msg));
                return Ok(MSG_SIZE);
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            queue.wait_change(env.wait_slice());
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let msg = decode_message(buf)?;
        let method = self.state.lock().method;
        self.deliver(method, msg)?;
        Ok(MSG_SIZE)
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        match (cmd, arg) {
            (WINDOWS_POST, IoctlArg::Message(msg)) => {
                self.deliver(Method::Post, *msg)?;
                Ok(0)
            }
            (WINDOWS_SEND, IoctlArg::Message(msg)) => {
                let result = self.deliver(Method::Send, *msg)?;
                Ok(i64::try_from(result).unwrap_or(i64::MAX))
            }
            (WINDOWS_POST, _) => {
                self.state.lock().method = Method::Post;
                Ok(0)
            }
            (WINDOWS_SEND, _) => {
                self.state.lock().method = Method::Send;
                Ok(0)
            }
            (WINDOWS_HWND, arg) => {
                let hwnd = arg.int_value().ok_or(Errno::EINVAL)?;
                self.state.lock().hwnd = u64::try_from(hwnd).map_err(|_| Errno::EINVAL)?;
                Ok(0)
            }
            (cmd, arg) => self.base.ioctl(cmd, &arg),
        }
    }

    fn close(&self) -> Result<(), Errno> {
        self.handle.close();
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(
            self.copy_with(self.base.dup_copy(), self.handle.duplicate(true)?),
        ))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(self.copy_with(
            self.base.copy_for(child),
            self.handle.fork_copy(&child.process)?,
        )))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }

    fn readiness(&self) -> Readiness {
        let hwnd = self.state.lock().hwnd;
        let filter = (hwnd != 0).then_some(hwnd);
        match self.queue() {
            Ok(queue) => Readiness {
                readable: queue.peek(filter, false).is_some(),
                writable: true,
                hangup: false,
                error: false,
            },
            Err(_) => Readiness {
                error: true,
                ..Readiness::default()
            },
        }
    }

    fn wait_source(&self) -> WaitSource {
        self.queue().map_or(WaitSource::Poll, WaitSource::Messages)
    }
}
