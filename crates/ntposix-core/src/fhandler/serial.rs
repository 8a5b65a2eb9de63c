//! Serial ports: `/dev/ttyS<N>` is `COM<N+1>`.
//!
//! Terminal attributes map onto the port's device control block; fields the
//! port has no notion of (local modes, `VMIN`/`VTIME`, output and CR
//! translation) are kept by the handler. Reads follow the `VMIN`/`VTIME`
//! rules of non-canonical input; with `ICANON` a read collects bytes until
//! a newline arrives or the buffer is full. There is no line editing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ntposix_native::Process;
use ntposix_native::serial::{
    CLRBREAK, CLRDTR, CLRRTS, Dcb, MS_CTS_ON, MS_DSR_ON, MS_RING_ON, MS_RLSD_ON, PURGE_RXABORT,
    PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR, Parity, RtsControl, SETBREAK, SETDTR, SETRTS,
    SETXOFF, SETXON, SerialPort, StopBits,
};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle, Readiness};
use crate::flags::O_CLOEXEC;
use crate::ioctl::{
    FIONREAD, IoctlArg, TCFLSH, TCGETS, TCSBRK, TCSETS, TCSETSF, TCSETSW, TCXONC, TIOCCBRK,
    TIOCM_CAR, TIOCM_CTS, TIOCM_DSR, TIOCM_DTR, TIOCM_RNG, TIOCM_RTS, TIOCMBIC, TIOCMBIS,
    TIOCMGET, TIOCMSET, TIOCSBRK,
};
use crate::termios::{
    B0, B9600, CLOCAL, CREAD, CRTSCTS, CRTSXOFF, CS5, CS6, CS7, CS8, CSIZE, CSTOPB, IGNCR, IGNPAR,
    INPCK, IXOFF, IXON, NCCS, ONLCR, PARENB, PARODD, TCIFLUSH, TCIOFF, TCIOFLUSH, TCION,
    TCOFLUSH, TCOOFF, TCOON, Termios, VMIN, VSTART, VSTOP, VTIME, baud_to_speed, speed_to_baud,
};

/// How long `tcsendbreak(fd, 0)` holds the line in break.
const BREAK_TIME: Duration = Duration::from_millis(250);

const DEFAULT_XON: u8 = 0x11;
const DEFAULT_XOFF: u8 = 0x13;

/// Attributes a port is opened with: 9600 8N1, no flow control, raw
/// blocking reads of at least one byte.
fn open_termios() -> Termios {
    let mut c_cc = [0u8; NCCS];
    c_cc[VMIN] = 1;
    c_cc[VSTART] = DEFAULT_XON;
    c_cc[VSTOP] = DEFAULT_XOFF;
    let mut tio = Termios {
        c_iflag: IGNPAR,
        c_oflag: 0,
        c_cflag: CS8 | CREAD | CLOCAL,
        c_lflag: 0,
        c_cc,
        c_ispeed: 0,
        c_ospeed: 0,
    };
    tio.set_speed(B9600);
    tio
}

/// The control block `tio` asks for on top of `current`.
fn termios_to_dcb(tio: &Termios, current: Dcb) -> Result<Dcb, Errno> {
    let speed = tio.speed();
    let baud_rate = if speed == B0 {
        current.baud_rate
    } else {
        speed_to_baud(speed).ok_or(Errno::EINVAL)?
    };
    let byte_size = match tio.c_cflag & CSIZE {
        CS5 => 5,
        CS6 => 6,
        CS7 => 7,
        _ => 8,
    };
    let parity = match (tio.c_cflag & PARENB != 0, tio.c_cflag & PARODD != 0) {
        (false, _) => Parity::None,
        (true, true) => Parity::Odd,
        (true, false) => Parity::Even,
    };
    let rts_control = if tio.c_cflag & (CRTSCTS | CRTSXOFF) != 0 {
        RtsControl::Handshake
    } else {
        RtsControl::Enable
    };
    Ok(Dcb {
        baud_rate,
        byte_size,
        parity,
        stop_bits: if tio.c_cflag & CSTOPB != 0 {
            StopBits::Two
        } else {
            StopBits::One
        },
        check_parity: tio.c_iflag & INPCK != 0 && tio.c_iflag & IGNPAR == 0,
        out_x: tio.c_iflag & IXON != 0,
        in_x: tio.c_iflag & IXOFF != 0,
        xon_char: match tio.c_cc[VSTART] {
            0 => DEFAULT_XON,
            c => c,
        },
        xoff_char: match tio.c_cc[VSTOP] {
            0 => DEFAULT_XOFF,
            c => c,
        },
        outx_cts_flow: tio.c_cflag & CRTSCTS != 0,
        dsr_sensitivity: tio.c_cflag & CLOCAL == 0,
        rts_control,
    })
}

/// Overlay what the control block says onto the handler's attributes.
fn dcb_to_termios(dcb: &Dcb, kept: &Termios, hung_up: bool) -> Result<Termios, Errno> {
    let mut tio = *kept;
    let speed = if hung_up {
        B0
    } else {
        baud_to_speed(dcb.baud_rate).ok_or(Errno::EINVAL)?
    };
    tio.c_cflag &= !(CSIZE | CSTOPB | PARENB | PARODD | CRTSCTS | CRTSXOFF | CLOCAL);
    tio.set_speed(speed);
    tio.c_cflag |= match dcb.byte_size {
        5 => CS5,
        6 => CS6,
        7 => CS7,
        8 => CS8,
        _ => return Err(Errno::EINVAL),
    };
    if dcb.stop_bits == StopBits::Two {
        tio.c_cflag |= CSTOPB;
    }
    match dcb.parity {
        Parity::None => {}
        Parity::Odd => tio.c_cflag |= PARENB | PARODD,
        Parity::Even => tio.c_cflag |= PARENB,
    }
    tio.c_iflag &= !(INPCK | IGNPAR | IXON | IXOFF);
    tio.c_iflag |= if dcb.check_parity { INPCK } else { IGNPAR };
    if dcb.out_x {
        tio.c_iflag |= IXON;
    }
    if dcb.in_x {
        tio.c_iflag |= IXOFF;
    }
    tio.c_cc[VSTART] = dcb.xon_char;
    tio.c_cc[VSTOP] = dcb.xoff_char;
    if dcb.rts_control == RtsControl::Handshake {
        tio.c_cflag |= CRTSXOFF;
        if dcb.outx_cts_flow {
            tio.c_cflag |= CRTSCTS;
        }
    }
    if !dcb.dsr_sensitivity {
        tio.c_cflag |= CLOCAL;
    }
    Ok(tio)
}

#[derive(Debug, Clone, Copy)]
struct SerialState {
    tio: Termios,
    /// `B0` was set: DTR is down until a real speed is set again.
    hung_up: bool,
}

pub struct SerialHandler {
    base: FhBase,
    unit: usize,
    handle: NtHandle,
    state: Mutex<SerialState>,
}

impl SerialHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, unit: usize, flags: i32) -> Self {
        let dev = DevicePath::Serial { unit }.device_id();
        Self {
            base: FhBase::new(env, DeviceClass::Serial, dev, name, flags),
            unit,
            handle: NtHandle::empty(),
            state: Mutex::new(SerialState {
                tio: open_termios(),
                hung_up: false,
            }),
        }
    }

    fn port(&self) -> Result<Arc<SerialPort>, Errno> {
        let object = self.handle.object()?;
        Ok(Arc::clone(object.as_serial()?))
    }

    fn tcgetattr(&self) -> Result<Termios, Errno> {
        let dcb = self.port()?.dcb();
        let st = *self.state.lock();
        dcb_to_termios(&dcb, &st.tio, st.hung_up)
    }

    fn tcsetattr(&self, tio: &Termios) -> Result<(), Errno> {
        let port = self.port()?;
        let dcb = termios_to_dcb(tio, port.dcb())?;
        port.set_dcb(dcb)?;
        let hung_up = tio.speed() == B0;
        port.escape(if hung_up { CLRDTR } else { SETDTR })?;
        let mut st = self.state.lock();
        st.tio = *tio;
        st.hung_up = hung_up;
        log::debug!(
            "{}: {} baud, {} data bits, {:?} parity{}",
            self.base.name(),
            dcb.baud_rate,
            dcb.byte_size,
            dcb.parity,
            if hung_up { ", DTR dropped" } else { "" }
        );
        Ok(())
    }

    /// Wait for queued output to leave the port.
    fn drain(&self) -> Result<(), Errno> {
        let port = self.port()?;
        let env = self.base.env();
        while !port.wait_drained(env.wait_slice()) {
            if env.interrupted() {
                return Err(Errno::EINTR);
            }
        }
        Ok(())
    }

    fn flush(&self, queue: i64) -> Result<(), Errno> {
        let port = self.port()?;
        let flags = match queue {
            TCIFLUSH => PURGE_RXABORT | PURGE_RXCLEAR,
            TCOFLUSH => PURGE_TXABORT | PURGE_TXCLEAR,
            TCIOFLUSH => PURGE_RXABORT | PURGE_RXCLEAR | PURGE_TXABORT | PURGE_TXCLEAR,
            _ => return Err(Errno::EINVAL),
        };
        port.purge(flags);
        Ok(())
    }

    fn flow(&self, action: i64) -> Result<(), Errno> {
        let port = self.port()?;
        match action {
            TCOOFF => port.escape(SETXOFF)?,
            TCOON => port.escape(SETXON)?,
            TCIOFF | TCION => {
                let dcb = port.dcb();
                port.transmit_char(if action == TCION {
                    dcb.xon_char
                } else {
                    dcb.xoff_char
                });
            }
            _ => return Err(Errno::EINVAL),
        }
        Ok(())
    }

    fn send_break(&self, duration: Duration) -> Result<(), Errno> {
        let port = self.port()?;
        port.escape(SETBREAK)?;
        std::thread::sleep(duration);
        port.escape(CLRBREAK)?;
        Ok(())
    }

    fn modem_lines(&self) -> Result<i64, Errno> {
        let port = self.port()?;
        let (dtr, rts) = port.output_lines();
        let status = port.modem_status();
        let mut bits = 0;
        for (on, bit) in [
            (dtr, TIOCM_DTR),
            (rts, TIOCM_RTS),
            (status & MS_CTS_ON != 0, TIOCM_CTS),
            (status & MS_DSR_ON != 0, TIOCM_DSR),
            (status & MS_RLSD_ON != 0, TIOCM_CAR),
            (status & MS_RING_ON != 0, TIOCM_RNG),
        ] {
            if on {
                bits |= bit;
            }
        }
        Ok(bits)
    }

    /// Drive DTR and RTS; `set` and `clear` are `TIOCM_*` masks.
    fn set_modem_lines(&self, set: i64, clear: i64) -> Result<(), Errno> {
        let port = self.port()?;
        if set & TIOCM_DTR != 0 {
            port.escape(SETDTR)?;
        } else if clear & TIOCM_DTR != 0 {
            port.escape(CLRDTR)?;
        }
        if set & TIOCM_RTS != 0 {
            port.escape(SETRTS)?;
        } else if clear & TIOCM_RTS != 0 {
            port.escape(CLRRTS)?;
        }
        Ok(())
    }

    /// Move what the port has into `buf[got..]`, dropping CRs under `IGNCR`.
    fn take(port: &SerialPort, tio: &Termios, buf: &mut [u8], got: usize) -> usize {
        let mut n = port.read(&mut buf[got..]);
        if tio.c_iflag & IGNCR != 0 {
            let mut kept = got;
            for i in got..got + n {
                if buf[i] != b'\r' {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            n = kept - got;
        }
        n
    }
}

impl Fhandler for SerialHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let env = self.base.env();
        let owned = env
            .kernel
            .open_serial(&env.process, self.unit, flags & O_CLOEXEC == 0)?;
        self.handle.bind(owned);
        let tio = self.state.lock().tio;
        if let Err(e) = self.tcsetattr(&tio) {
            self.handle.close();
            return Err(e);
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let port = self.port()?;
        let env = self.base.env();
        let tio = self.state.lock().tio;
        let canonical = tio.canonical();
        let vmin = usize::from(tio.c_cc[VMIN]).min(buf.len());
        let vtime = Duration::from_millis(u64::from(tio.c_cc[VTIME]) * 100);

        let mut got = 0;
        let mut last_byte: Option<Instant> = None;
        let started = Instant::now();
        loop {
            let n = Self::take(&port, &tio, buf, got);
            if n > 0 {
                got += n;
                last_byte = Some(Instant::now());
            }
            if canonical && buf[..got].contains(&b'\n') {
                return Ok(got);
            }
            if !canonical {
                let satisfied = if vmin == 0 {
                    got > 0 || vtime.is_zero()
                } else {
                    got >= vmin
                };
                if satisfied {
                    return Ok(got);
                }
            }
            if got == buf.len() {
                return Ok(got);
            }
            if self.base.nonblocking() {
                return if got > 0 { Ok(got) } else { Err(Errno::EAGAIN) };
            }
            if !canonical && !vtime.is_zero() {
                // With VMIN 0, VTIME bounds the whole read; otherwise it is
                // the gap allowed between bytes once the first arrived.
                let expired = match (vmin, last_byte) {
                    (0, _) => started.elapsed() >= vtime,
                    (_, Some(at)) => at.elapsed() >= vtime,
                    (_, None) => false,
                };
                if expired {
                    return Ok(got);
                }
            }
            if env.interrupted() {
                return if got > 0 { Ok(got) } else { Err(Errno::EINTR) };
            }
            let slice = if vtime.is_zero() {
                env.wait_slice()
            } else {
                env.wait_slice().min(vtime)
            };
            port.wait_input(slice);
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let port = self.port()?;
        let tio = self.state.lock().tio;
        if tio.c_oflag & ONLCR != 0 {
            let mut out = Vec::with_capacity(buf.len());
            for &c in buf {
                if c == b'\n' {
                    out.push(b'\r');
                }
                out.push(c);
            }
            port.write(&out);
        } else {
            port.write(buf);
        }
        Ok(buf.len())
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        match (cmd, arg) {
            (TCGETS, IoctlArg::Termios(tio)) => {
                *tio = self.tcgetattr()?;
                Ok(0)
            }
            (TCSETS, IoctlArg::Termios(tio)) => {
                self.tcsetattr(tio)?;
                Ok(0)
            }
            (TCSETSW, IoctlArg::Termios(tio)) => {
                self.drain()?;
                self.tcsetattr(tio)?;
                Ok(0)
            }
            (TCSETSF, IoctlArg::Termios(tio)) => {
                self.drain()?;
                self.flush(TCIFLUSH)?;
                self.tcsetattr(tio)?;
                Ok(0)
            }
            (TCFLSH, arg) => {
                self.flush(arg.int_value().ok_or(Errno::EINVAL)?)?;
                Ok(0)
            }
            (TCXONC, arg) => {
                self.flow(arg.int_value().ok_or(Errno::EINVAL)?)?;
                Ok(0)
            }
            // A zero argument is tcsendbreak, anything else tcdrain.
            (TCSBRK, arg) => {
                match arg.int_value().ok_or(Errno::EINVAL)? {
                    0 => self.send_break(BREAK_TIME)?,
                    _ => self.drain()?,
                }
                Ok(0)
            }
            (TIOCSBRK, _) => {
                self.port()?.escape(SETBREAK)?;
                Ok(0)
            }
            (TIOCCBRK, _) => {
                self.port()?.escape(CLRBREAK)?;
                Ok(0)
            }
            (TIOCMGET, IoctlArg::IntOut(out)) => {
                *out = self.modem_lines()?;
                Ok(0)
            }
            (TIOCMSET, arg) => {
                let bits = arg.int_value().ok_or(Errno::EINVAL)?;
                self.set_modem_lines(bits, !bits)?;
                Ok(0)
            }
            (TIOCMBIS, arg) => {
                self.set_modem_lines(arg.int_value().ok_or(Errno::EINVAL)?, 0)?;
                Ok(0)
            }
            (TIOCMBIC, arg) => {
                self.set_modem_lines(0, arg.int_value().ok_or(Errno::EINVAL)?)?;
                Ok(0)
            }
            (FIONREAD, IoctlArg::IntOut(out)) => {
                let (queued, _) = self.port()?.queue_status();
                *out = i64::try_from(queued).unwrap_or(i64::MAX);
                Ok(0)
            }
            (TCGETS | TCSETS | TCSETSW | TCSETSF | TIOCMGET | FIONREAD, _) => Err(Errno::EINVAL),
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
            unit: self.unit,
            handle: self.handle.duplicate(true)?,
            state: Mutex::new(*self.state.lock()),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            unit: self.unit,
            handle: self.handle.fork_copy(&child.process)?,
            state: Mutex::new(*self.state.lock()),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    /// Input that arrived for the old image is not the new image's to read.
    fn fixup_after_exec(&self) {
        if let Ok(port) = self.port() {
            port.purge(PURGE_RXABORT);
        }
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }

    fn readiness(&self) -> Readiness {
        match self.port() {
            Ok(port) => Readiness {
                readable: port.queue_status().0 > 0,
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

    fn is_tty(&self) -> bool {
        true
    }

    fn proc_name(&self) -> String {
        format!("/dev/ttyS{}", self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_NONBLOCK, O_RDWR};
    use crate::signal::{Disposition, SIGUSR1};
    use crate::termios::{B115200, B19200, ICANON};
    use crate::testing::TestRig;

    fn open(rig: &TestRig, flags: i32) -> Arc<SerialHandler> {
        let fh = SerialHandler::new(rig.env(), "/dev/ttyS0", 0, flags);
        fh.open(flags, 0).unwrap();
        Arc::new(fh)
    }

    fn port(rig: &TestRig) -> Arc<SerialPort> {
        Arc::clone(rig.kernel().serial(0).unwrap())
    }

    fn getattr(fh: &SerialHandler) -> Termios {
        let mut tio = Termios::default();
        fh.ioctl(TCGETS, IoctlArg::Termios(&mut tio)).unwrap();
        tio
    }

    fn setattr(fh: &SerialHandler, mut tio: Termios) -> Result<i64, Errno> {
        fh.ioctl(TCSETS, IoctlArg::Termios(&mut tio))
    }

    #[test]
    fn opens_at_9600_8n1() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let tio = getattr(&fh);
        assert_eq!(tio.speed(), B9600);
        assert_eq!(tio.c_cflag & (CSIZE | PARENB | CSTOPB), CS8);
        assert_ne!(tio.c_cflag & CLOCAL, 0);
        assert_eq!(tio.c_cc[VMIN], 1);
        assert!(fh.is_tty());
        let dcb = port(&rig).dcb();
        assert_eq!((dcb.baud_rate, dcb.byte_size, dcb.parity), (9600, 8, Parity::None));
    }

    #[test]
    fn termios_maps_onto_the_control_block() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.set_speed(B19200);
        tio.c_cflag = (tio.c_cflag & !(CSIZE | CLOCAL)) | CS7 | PARENB | PARODD | CSTOPB | CRTSCTS;
        tio.c_iflag = (tio.c_iflag & !IGNPAR) | INPCK | IXON | IXOFF;
        tio.c_cc[VSTART] = 0;
        setattr(&fh, tio).unwrap();

        let dcb = port(&rig).dcb();
        assert_eq!(dcb.baud_rate, 19200);
        assert_eq!(dcb.byte_size, 7);
        assert_eq!(dcb.parity, Parity::Odd);
        assert_eq!(dcb.stop_bits, StopBits::Two);
        assert!(dcb.check_parity && dcb.out_x && dcb.in_x);
        assert!(dcb.outx_cts_flow && dcb.dsr_sensitivity);
        assert_eq!(dcb.rts_control, RtsControl::Handshake);
        assert_eq!(dcb.xon_char, DEFAULT_XON);

        let back = getattr(&fh);
        assert_eq!(back.speed(), B19200);
        assert_eq!(back.c_cflag & CSIZE, CS7);
        assert_ne!(back.c_cflag & CRTSCTS, 0);
        assert_ne!(back.c_cflag & CRTSXOFF, 0);
        assert_eq!(back.c_cflag & CLOCAL, 0);
        assert_ne!(back.c_iflag & INPCK, 0);
        assert_eq!(back.c_cc[VSTART], DEFAULT_XON);
    }

    #[test]
    fn unsupported_speed_is_rejected_and_nothing_changes() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.set_speed(crate::termios::B230400);
        assert_eq!(setattr(&fh, tio), Err(Errno::EINVAL));
        tio.set_speed(crate::termios::B1800);
        assert_eq!(setattr(&fh, tio), Err(Errno::EINVAL));
        assert_eq!(getattr(&fh).speed(), B9600);
    }

    #[test]
    fn b0_drops_dtr_until_a_speed_is_set() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.set_speed(B0);
        setattr(&fh, tio).unwrap();
        assert!(!port(&rig).output_lines().0);
        assert_eq!(getattr(&fh).speed(), B0);
        tio.set_speed(B115200);
        setattr(&fh, tio).unwrap();
        assert!(port(&rig).output_lines().0);
        assert_eq!(port(&rig).dcb().baud_rate, 115_200);
    }

    #[test]
    fn blocking_read_waits_for_data() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let p = port(&rig);
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            p.inject(b"ok");
        });
        let mut buf = [0u8; 8];
        let n = fh.read(&mut buf).unwrap();
        feeder.join().unwrap();
        assert!(n >= 1);
        assert_eq!(&buf[..n], &b"ok"[..n]);
    }

    #[test]
    fn vmin_collects_that_many_bytes() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.c_cc[VMIN] = 4;
        setattr(&fh, tio).unwrap();
        let p = port(&rig);
        p.inject(b"ab");
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            p.inject(b"cdef");
        });
        let mut buf = [0u8; 16];
        let n = fh.read(&mut buf).unwrap();
        feeder.join().unwrap();
        assert!(n >= 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn vtime_alone_times_out_with_nothing() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.c_cc[VMIN] = 0;
        tio.c_cc[VTIME] = 1;
        setattr(&fh, tio).unwrap();
        let mut buf = [0u8; 4];
        let started = Instant::now();
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(100));

        tio.c_cc[VTIME] = 0;
        setattr(&fh, tio).unwrap();
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
        port(&rig).inject(b"z");
        assert_eq!(fh.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn inter_byte_timer_ends_a_short_burst() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.c_cc[VMIN] = 10;
        tio.c_cc[VTIME] = 1;
        setattr(&fh, tio).unwrap();
        port(&rig).inject(b"abc");
        let mut buf = [0u8; 16];
        assert_eq!(fh.read(&mut buf).unwrap(), 3);
    }

    #[test]
    fn canonical_read_stops_at_newline_and_ignores_cr() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut tio = getattr(&fh);
        tio.c_lflag |= ICANON;
        tio.c_iflag |= IGNCR;
        setattr(&fh, tio).unwrap();
        port(&rig).inject(b"AT\r\n");
        let mut buf = [0u8; 16];
        let n = fh.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"AT\n");
    }

    #[test]
    fn nonblocking_and_interrupted_reads() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR | O_NONBLOCK);
        let mut buf = [0u8; 4];
        assert_eq!(fh.read(&mut buf), Err(Errno::EAGAIN));
        fh.close().unwrap();

        let fh = open(&rig, O_RDWR);
        let env = rig.env();
        env.signals.set_disposition(SIGUSR1, Disposition::Catch).unwrap();
        env.signals.raise(SIGUSR1).unwrap();
        assert_eq!(fh.read(&mut buf), Err(Errno::EINTR));
    }

    #[test]
    fn onlcr_and_flow_control() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let p = port(&rig);
        let mut tio = getattr(&fh);
        tio.c_oflag |= ONLCR;
        setattr(&fh, tio).unwrap();
        assert_eq!(fh.write(b"hi\n").unwrap(), 3);
        assert_eq!(p.take_output(), b"hi\r\n");

        fh.ioctl(TCXONC, IoctlArg::Int(TCOOFF)).unwrap();
        fh.write(b"x").unwrap();
        assert_eq!(p.take_output(), b"");
        fh.ioctl(TCXONC, IoctlArg::Int(TCOON)).unwrap();
        assert_eq!(p.take_output(), b"x");
        fh.ioctl(TCXONC, IoctlArg::Int(TCIOFF)).unwrap();
        assert_eq!(p.take_output(), [DEFAULT_XOFF]);
        assert_eq!(fh.ioctl(TCXONC, IoctlArg::Int(9)), Err(Errno::EINVAL));
    }

    #[test]
    fn flush_discards_the_selected_queue() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        port(&rig).inject(b"stale");
        let mut avail = 0;
        fh.ioctl(FIONREAD, IoctlArg::IntOut(&mut avail)).unwrap();
        assert_eq!(avail, 5);
        fh.ioctl(TCFLSH, IoctlArg::Int(TCOFLUSH)).unwrap();
        assert_eq!(port(&rig).queue_status().0, 5);
        fh.ioctl(TCFLSH, IoctlArg::Int(TCIFLUSH)).unwrap();
        assert_eq!(port(&rig).queue_status().0, 0);
        assert_eq!(fh.ioctl(TCFLSH, IoctlArg::Int(7)), Err(Errno::EINVAL));
    }

    #[test]
    fn modem_lines_through_tiocm() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let mut bits = 0;
        fh.ioctl(TIOCMGET, IoctlArg::IntOut(&mut bits)).unwrap();
        assert_eq!(bits, TIOCM_DTR | TIOCM_RTS | TIOCM_CTS | TIOCM_DSR | TIOCM_CAR);

        fh.ioctl(TIOCMBIC, IoctlArg::Int(TIOCM_RTS)).unwrap();
        assert_eq!(port(&rig).output_lines(), (true, false));
        fh.ioctl(TIOCMSET, IoctlArg::Int(TIOCM_RTS)).unwrap();
        assert_eq!(port(&rig).output_lines(), (false, true));
        fh.ioctl(TIOCMBIS, IoctlArg::Int(TIOCM_DTR)).unwrap();
        assert_eq!(port(&rig).output_lines(), (true, true));

        port(&rig).set_modem_inputs(MS_RING_ON);
        fh.ioctl(TIOCMGET, IoctlArg::IntOut(&mut bits)).unwrap();
        assert_eq!(bits, TIOCM_DTR | TIOCM_RTS | TIOCM_RNG);
    }

    #[test]
    fn break_and_drain() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        fh.ioctl(TCSBRK, IoctlArg::Int(0)).unwrap();
        assert_eq!(port(&rig).breaks_sent(), 1);
        fh.ioctl(TIOCSBRK, IoctlArg::None).unwrap();
        assert!(port(&rig).is_breaking());
        fh.ioctl(TIOCCBRK, IoctlArg::None).unwrap();
        assert!(!port(&rig).is_breaking());
        fh.write(b"queued").unwrap();
        fh.ioctl(TCSBRK, IoctlArg::Int(1)).unwrap();
        assert_eq!(port(&rig).queue_status().1, 0);
    }

    #[test]
    fn dup_shares_the_port_and_a_second_open_is_refused() {
        let rig = TestRig::new().build();
        let fh = open(&rig, O_RDWR);
        let again = SerialHandler::new(rig.env(), "/dev/ttyS0", 0, O_RDWR);
        assert_eq!(again.open(O_RDWR, 0), Err(Errno::EACCES));
        let copy = Arc::clone(&fh).dup().unwrap();
        port(&rig).inject(b"q");
        let mut buf = [0u8; 1];
        assert_eq!(copy.read(&mut buf).unwrap(), 1);
        assert_eq!(copy.proc_name(), "/dev/ttyS0");
    }
}
