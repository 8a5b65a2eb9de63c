//! The console: `/dev/console`, `/dev/tty`, `/dev/conin`, `/dev/conout`.
//!
//! One console object is the archetype for every descriptor that refers to
//! the console in a process: `dup` and repeated opens alias it and only the
//! reference count moves. Keystrokes pulled from the device go through the
//! [`LineDiscipline`]; output is post-processed per termios and then
//! rendered onto the screen buffer, interpreting control characters and a
//! subset of ANSI escape sequences (cursor motion, erase, SGR colours).

use std::sync::Arc;

use ntposix_native::Process;
use ntposix_native::console::{ConsoleDevice, DEFAULT_ATTRIBUTE};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle, Readiness, WaitSource};
use crate::flags::O_CLOEXEC;
use crate::ioctl::{
    FIONREAD, IoctlArg, TCFLSH, TCGETS, TCSETS, TCSETSF, TCSETSW, TIOCGWINSZ, TIOCSWINSZ,
};
use crate::signal::SIGWINCH;
use crate::termios::{
    LineDiscipline, TCIFLUSH, TCIOFLUSH, TCOFLUSH, Termios, Winsize, process_output,
};

const ESC: u8 = 0x1b;
const TAB_WIDTH: u16 = 8;

// ---------------------------------------------------------------------------
// Escape sequence parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
enum Ansi {
    #[default]
    Normal,
    Escape,
    /// Inside `ESC [`; `private` is set by a leading `?`.
    Csi { params: Vec<u16>, private: bool },
}

fn param(params: &[u16], index: usize, default: u16) -> u16 {
    params
        .get(index)
        .copied()
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

/// ANSI colour index to console attribute bits (red and blue swap places).
const fn ansi_to_attr(colour: u16) -> u16 {
    ((colour & 1) << 2) | (colour & 2) | ((colour & 4) >> 2)
}

/// Renders output bytes onto a console screen buffer.
#[derive(Debug, Clone, Default)]
struct Screen {
    ansi: Ansi,
    saved_cursor: (u16, u16),
}

impl Screen {
    fn render(&mut self, device: &ConsoleDevice, bytes: &[u8]) {
        let mut run = Vec::new();
        for &c in bytes {
            if matches!(self.ansi, Ansi::Normal) && (c >= 0x20 && c != 0x7f) {
                run.push(c);
                continue;
            }
            if !run.is_empty() {
                device.write_chars(&run);
                run.clear();
            }
            self.control(device, c);
        }
        if !run.is_empty() {
            device.write_chars(&run);
        }
    }

    fn control(&mut self, device: &ConsoleDevice, c: u8) {
        match std::mem::take(&mut self.ansi) {
            Ansi::Normal => match c {
                ESC => self.ansi = Ansi::Escape,
                b'\r' => move_to(device, Some(0), None),
                b'\n' => line_feed(device),
                0x08 => {
                    let info = device.screen_info();
                    move_to(device, Some(info.cursor_x.saturating_sub(1)), None);
                }
                b'\t' => {
                    let info = device.screen_info();
                    let next = (info.cursor_x / TAB_WIDTH + 1) * TAB_WIDTH;
                    move_to(device, Some(next.min(info.width - 1)), None);
                }
                // Bell and the remaining C0 controls draw nothing.
                _ => {}
            },
            Ansi::Escape => match c {
                b'[' => {
                    self.ansi = Ansi::Csi {
                        params: Vec::new(),
                        private: false,
                    };
                }
                b'7' => self.save_cursor(device),
                b'8' => self.restore_cursor(device),
                b'c' => {
                    clear(device, 2);
                    device.set_attribute(DEFAULT_ATTRIBUTE);
                    move_to(device, Some(0), Some(0));
                }
                _ => log::trace!("console: unhandled ESC {c:#x}"),
            },
            Ansi::Csi {
                mut params,
                mut private,
            } => match c {
                b'0'..=b'9' => {
                    if params.is_empty() {
                        params.push(0);
                    }
                    if let Some(last) = params.last_mut() {
                        *last = last.saturating_mul(10).saturating_add(u16::from(c - b'0'));
                    }
                    self.ansi = Ansi::Csi { params, private };
                }
                b';' => {
                    if params.is_empty() {
                        params.push(0);
                    }
                    params.push(0);
                    self.ansi = Ansi::Csi { params, private };
                }
                b'?' => {
                    private = true;
                    self.ansi = Ansi::Csi { params, private };
                }
                0x40..=0x7e if !private => self.csi(device, c, &params),
                0x40..=0x7e => log::trace!("console: private mode {c:#x} ignored"),
                _ => {}
            },
        }
    }

    fn csi(&mut self, device: &ConsoleDevice, final_byte: u8, params: &[u16]) {
        let info = device.screen_info();
        let n = param(params, 0, 1);
        match final_byte {
            b'A' => move_to(device, None, Some(info.cursor_y.saturating_sub(n))),
            b'B' => move_to(device, None, Some(info.cursor_y.saturating_add(n))),
            b'C' => move_to(device, Some(info.cursor_x.saturating_add(n)), None),
            b'D' => move_to(device, Some(info.cursor_x.saturating_sub(n)), None),
            b'G' => move_to(device, Some(n - 1), None),
            b'd' => move_to(device, None, Some(n - 1)),
            b'H' | b'f' => {
                let row = param(params, 0, 1) - 1;
                let col = param(params, 1, 1) - 1;
                move_to(device, Some(col), Some(row));
            }
            b'J' => clear(device, params.first().copied().unwrap_or(0)),
            b'K' => clear_line(device, params.first().copied().unwrap_or(0)),
            b'm' => sgr(device, params),
            b's' => self.save_cursor(device),
            b'u' => self.restore_cursor(device),
            _ => log::trace!("console: unhandled CSI {final_byte:#x}"),
        }
    }

    fn save_cursor(&mut self, device: &ConsoleDevice) {
        let info = device.screen_info();
        self.saved_cursor = (info.cursor_x, info.cursor_y);
    }

    fn restore_cursor(&self, device: &ConsoleDevice) {
        let (x, y) = self.saved_cursor;
        move_to(device, Some(x), Some(y));
    }
}

/// Move the cursor, clamping to the buffer. `None` keeps that coordinate.
fn move_to(device: &ConsoleDevice, x: Option<u16>, y: Option<u16>) {
    let info = device.screen_info();
    let x = x.unwrap_or(info.cursor_x).min(info.width - 1);
    let y = y.unwrap_or(info.cursor_y).min(info.height - 1);
    let _ = device.set_cursor(x, y);
}

fn line_feed(device: &ConsoleDevice) {
    let info = device.screen_info();
    if info.cursor_y + 1 >= info.height {
        device.scroll_up(1);
    } else {
        let _ = device.set_cursor(info.cursor_x, info.cursor_y + 1);
    }
}

fn clear(device: &ConsoleDevice, mode: u16) {
    let info = device.screen_info();
    let width = usize::from(info.width);
    let cells = width * usize::from(info.height);
    let cursor = usize::from(info.cursor_y) * width + usize::from(info.cursor_x);
    let _ = match mode {
        0 => device.fill_chars(info.cursor_x, info.cursor_y, b' ', cells - cursor),
        1 => device.fill_chars(0, 0, b' ', cursor + 1),
        _ => device.fill_chars(0, 0, b' ', cells),
    };
}

fn clear_line(device: &ConsoleDevice, mode: u16) {
    let info = device.screen_info();
    let width = usize::from(info.width);
    let x = usize::from(info.cursor_x);
    let _ = match mode {
        0 => device.fill_chars(info.cursor_x, info.cursor_y, b' ', width - x),
        1 => device.fill_chars(0, info.cursor_y, b' ', x + 1),
        _ => device.fill_chars(0, info.cursor_y, b' ', width),
    };
}

fn sgr(device: &ConsoleDevice, params: &[u16]) {
    let mut attr = device.screen_info().attribute;
    let codes: &[u16] = if params.is_empty() { &[0] } else { params };
    for &code in codes {
        attr = match code {
            0 => DEFAULT_ATTRIBUTE,
            1 => attr | 0x08,
            22 => attr & !0x08,
            30..=37 => (attr & !0x07) | ansi_to_attr(code - 30),
            39 => (attr & !0x07) | (DEFAULT_ATTRIBUTE & 0x07),
            40..=47 => (attr & !0x70) | (ansi_to_attr(code - 40) << 4),
            49 => attr & !0x70,
            _ => attr,
        };
    }
    device.set_attribute(attr);
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ConsoleState {
    tio: Termios,
    ld: LineDiscipline,
    screen: Screen,
    /// Size set through `TIOCSWINSZ`; the buffer size otherwise.
    winsize: Option<Winsize>,
}

pub struct ConsoleHandler {
    base: FhBase,
    handle: NtHandle,
    state: Mutex<ConsoleState>,
}

impl ConsoleHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, flags: i32) -> Self {
        let dev = DevicePath::Console.device_id();
        Self {
            base: FhBase::new(env, DeviceClass::Console, dev, name, flags),
            handle: NtHandle::empty(),
            state: Mutex::new(ConsoleState::default()),
        }
    }

    fn device(&self) -> Result<Arc<ConsoleDevice>, Errno> {
        let object = self.handle.object()?;
        Ok(Arc::clone(object.as_console()?))
    }

    /// Feed queued keystrokes through the line discipline, echoing and
    /// raising signals as it asks.
    fn pump(&self, device: &ConsoleDevice, st: &mut ConsoleState) {
        let mut keys = [0u8; 64];
        loop {
            let n = device.read_input(&mut keys);
            if n == 0 {
                break;
            }
            for &key in &keys[..n] {
                let tio = st.tio;
                let effect = st.ld.input(&tio, key);
                if !effect.echo.is_empty() {
                    let echo = process_output(&tio, &effect.echo);
                    st.screen.render(device, &echo);
                }
                if let Some(sig) = effect.signal {
                    log::debug!("{}: keyboard signal {sig}", self.base.name());
                    let _ = self.base.env().signals.raise(sig);
                }
            }
        }
    }

    #[must_use]
    pub fn termios(&self) -> Termios {
        self.state.lock().tio
    }

    fn winsize(&self, st: &ConsoleState) -> Result<Winsize, Errno> {
        if let Some(ws) = st.winsize {
            return Ok(ws);
        }
        let info = self.device()?.screen_info();
        Ok(Winsize {
            ws_row: info.height,
            ws_col: info.width,
            ws_xpixel: 0,
            ws_ypixel: 0,
        })
    }

    fn flush(&self, queue: i64) -> Result<(), Errno> {
        match queue {
            TCIFLUSH | TCIOFLUSH => {
                self.device()?.flush_input();
                self.state.lock().ld.flush();
                Ok(())
            }
            // Output is never queued.
            TCOFLUSH => Ok(()),
            _ => Err(Errno::EINVAL),
        }
    }
}

impl Fhandler for ConsoleHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let env = self.base.env();
        let owned = env.kernel.open_console(&env.process, flags & O_CLOEXEC == 0);
        self.handle.bind(owned);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let device = self.device()?;
        let env = self.base.env();
        loop {
            {
                let mut st = self.state.lock();
                self.pump(&device, &mut st);
                let tio = st.tio;
                if let Some(n) = st.ld.read(&tio, buf) {
                    return Ok(n);
                }
            }
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            device.wait_input(env.wait_slice());
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let device = self.device()?;
        let env = self.base.env();
        loop {
            let mut st = self.state.lock();
            self.pump(&device, &mut st);
            if !st.ld.is_stopped() {
                let out = process_output(&st.tio, buf);
                st.screen.render(&device, &out);
                return Ok(buf.len());
            }
            drop(st);
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
            if self.base.nonblocking() {
                return Err(Errno::EAGAIN);
            }
            device.wait_input(env.wait_slice());
        }
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        match (cmd, arg) {
            (TCGETS, IoctlArg::Termios(tio)) => {
                *tio = self.state.lock().tio;
                Ok(0)
            }
            (TCSETS | TCSETSW, IoctlArg::Termios(tio)) => {
                self.state.lock().tio = *tio;
                Ok(0)
            }
            (TCSETSF, IoctlArg::Termios(tio)) => {
                self.flush(TCIFLUSH)?;
                self.state.lock().tio = *tio;
                Ok(0)
            }
            (TCFLSH, arg) => {
                self.flush(arg.int_value().ok_or(Errno::EINVAL)?)?;
                Ok(0)
            }
            (TIOCGWINSZ, IoctlArg::Winsize(ws)) => {
                *ws = self.winsize(&self.state.lock())?;
                Ok(0)
            }
            (TIOCSWINSZ, IoctlArg::Winsize(ws)) => {
                let mut st = self.state.lock();
                let changed = self.winsize(&st)? != *ws;
                st.winsize = Some(*ws);
                drop(st);
                if changed {
                    let _ = self.base.env().signals.raise(SIGWINCH);
                }
                Ok(0)
            }
            (FIONREAD, IoctlArg::IntOut(out)) => {
                let device = self.device()?;
                let mut st = self.state.lock();
                self.pump(&device, &mut st);
                *out = i64::try_from(st.ld.available()).unwrap_or(i64::MAX);
                Ok(0)
            }
            (TCGETS | TCSETS | TCSETSW | TCSETSF | TIOCGWINSZ | TIOCSWINSZ | FIONREAD, _) => {
                Err(Errno::EINVAL)
            }
            (cmd, arg) => self.base.ioctl(cmd, &arg),
        }
    }

    fn close(&self) -> Result<(), Errno> {
        log::trace!("{}: last reference closed", self.base.name());
        self.handle.close();
        Ok(())
    }

    /// The archetype is shared: a new slot only takes a reference.
    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        self.base.add_ref();
        Ok(self)
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let st = self.state.lock();
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            handle: self.handle.fork_copy(&child.process)?,
            state: Mutex::new(ConsoleState {
                tio: st.tio,
                ld: LineDiscipline::new(),
                screen: st.screen.clone(),
                winsize: st.winsize,
            }),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }

    fn readiness(&self) -> Readiness {
        let Ok(device) = self.device() else {
            return Readiness {
                error: true,
                ..Readiness::default()
            };
        };
        let mut st = self.state.lock();
        self.pump(&device, &mut st);
        Readiness {
            readable: st.ld.readable(&st.tio),
            writable: !st.ld.is_stopped(),
            hangup: false,
            error: false,
        }
    }

    fn wait_source(&self) -> WaitSource {
        self.device().map_or(WaitSource::Poll, WaitSource::Console)
    }

    fn is_tty(&self) -> bool {
        true
    }

    fn is_archetype(&self) -> bool {
        true
    }

    fn proc_name(&self) -> String {
        "/dev/cons0".to_owned()
    }
}
