//! Serial communication ports (`COMn`).
//!
//! A port carries a device control block, the modem lines and two byte
//! queues: bytes received from the line and bytes waiting to go out. The
//! primitive calls never block; waiting for input is
//! [`SerialPort::wait_input`]. Output leaves the transmit queue as soon as
//! flow control allows: it holds while an XOFF is in effect (received from
//! the line with `out_x`, or set by `SETXOFF`) and while CTS is low with
//! `outx_cts_flow`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::status::WinError;

// EscapeCommFunction codes.
pub const SETXOFF: u32 = 1;
pub const SETXON: u32 = 2;
pub const SETRTS: u32 = 3;
pub const CLRRTS: u32 = 4;
pub const SETDTR: u32 = 5;
pub const CLRDTR: u32 = 6;
pub const SETBREAK: u32 = 8;
pub const CLRBREAK: u32 = 9;

// PurgeComm flags.
pub const PURGE_TXABORT: u32 = 0x1;
pub const PURGE_RXABORT: u32 = 0x2;
pub const PURGE_TXCLEAR: u32 = 0x4;
pub const PURGE_RXCLEAR: u32 = 0x8;

// GetCommModemStatus bits.
pub const MS_CTS_ON: u32 = 0x10;
pub const MS_DSR_ON: u32 = 0x20;
pub const MS_RING_ON: u32 = 0x40;
pub const MS_RLSD_ON: u32 = 0x80;

/// Rates the port hardware accepts.
pub const BAUD_RATES: [u32; 11] = [
    110, 300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115_200,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RtsControl {
    Disable,
    #[default]
    Enable,
    /// RTS follows receive-buffer space.
    Handshake,
}

/// `DCB`, reduced to the fields the terminal layer maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dcb {
    pub baud_rate: u32,
    pub byte_size: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Parity checking on receive.
    pub check_parity: bool,
    /// Honour XON/XOFF from the line on output.
    pub out_x: bool,
    /// Send XON/XOFF as the receive buffer fills and drains.
    pub in_x: bool,
    pub xon_char: u8,
    pub xoff_char: u8,
    pub outx_cts_flow: bool,
    pub dsr_sensitivity: bool,
    pub rts_control: RtsControl,
}

impl Default for Dcb {
    /// 9600 baud, 8 data bits, no parity, one stop bit.
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            check_parity: false,
            out_x: false,
            in_x: false,
            xon_char: 0x11,
            xoff_char: 0x13,
            outx_cts_flow: false,
            dsr_sensitivity: false,
            rts_control: RtsControl::Enable,
        }
    }
}

#[derive(Debug)]
struct PortState {
    dcb: Dcb,
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
    /// Everything that went out on the line.
    line: Vec<u8>,
    dtr: bool,
    rts: bool,
    /// Modem inputs as `MS_*` bits.
    inputs: u32,
    /// Output held by an XOFF.
    held: bool,
    breaking: bool,
    breaks: usize,
}

impl PortState {
    fn can_send(&self) -> bool {
        !self.held && (!self.dcb.outx_cts_flow || self.inputs & MS_CTS_ON != 0)
    }

    fn transmit(&mut self) {
        if self.can_send() && !self.breaking {
            let tx = std::mem::take(&mut self.tx);
            self.line.extend(tx);
        }
    }
}

/// One serial port.
#[derive(Debug)]
pub struct SerialPort {
    state: Mutex<PortState>,
    cond: Condvar,
}

impl Default for SerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPort {
    /// A port with a modem attached: CTS, DSR and carrier are up.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                dcb: Dcb::default(),
                rx: VecDeque::new(),
                tx: VecDeque::new(),
                line: Vec::new(),
                dtr: true,
                rts: true,
                inputs: MS_CTS_ON | MS_DSR_ON | MS_RLSD_ON,
                held: false,
                breaking: false,
                breaks: 0,
            }),
            cond: Condvar::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn dcb(&self) -> Dcb {
        self.state.lock().dcb
    }

    /// `SetCommState`. Rates outside [`BAUD_RATES`] and byte sizes outside
    /// 5..=8 are refused.
    pub fn set_dcb(&self, dcb: Dcb) -> Result<(), WinError> {
        if !BAUD_RATES.contains(&dcb.baud_rate) || !(5..=8).contains(&dcb.byte_size) {
            return Err(WinError::INVALID_PARAMETER);
        }
        let mut st = self.state.lock();
        match dcb.rts_control {
            RtsControl::Disable => st.rts = false,
            RtsControl::Enable | RtsControl::Handshake => st.rts = true,
        }
        if !dcb.out_x {
            st.held = false;
        }
        st.dcb = dcb;
        st.transmit();
        self.cond.notify_all();
        Ok(())
    }

    /// `EscapeCommFunction`.
    pub fn escape(&self, function: u32) -> Result<(), WinError> {
        let mut st = self.state.lock();
        match function {
            SETXOFF => st.held = true,
            SETXON => st.held = false,
            SETRTS => st.rts = true,
            CLRRTS => st.rts = false,
            SETDTR => st.dtr = true,
            CLRDTR => st.dtr = false,
            SETBREAK => st.breaking = true,
            CLRBREAK => {
                if st.breaking {
                    st.breaks += 1;
                }
                st.breaking = false;
            }
            _ => return Err(WinError::INVALID_PARAMETER),
        }
        st.transmit();
        self.cond.notify_all();
        Ok(())
    }

    /// `GetCommModemStatus`.
    #[must_use]
    pub fn modem_status(&self) -> u32 {
        self.state.lock().inputs
    }

    /// Output lines as (`DTR`, `RTS`).
    #[must_use]
    pub fn output_lines(&self) -> (bool, bool) {
        let st = self.state.lock();
        (st.dtr, st.rts)
    }

    /// Drive the modem inputs (`MS_*` bits) from the far side.
    pub fn set_modem_inputs(&self, status: u32) {
        let mut st = self.state.lock();
        st.inputs = status & (MS_CTS_ON | MS_DSR_ON | MS_RING_ON | MS_RLSD_ON);
        st.transmit();
        self.cond.notify_all();
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    /// Bytes arriving from the line. Flow-control characters are consumed
    /// when `out_x` is on.
    pub fn inject(&self, bytes: &[u8]) {
        let mut st = self.state.lock();
        for &b in bytes {
            if st.dcb.out_x && b == st.dcb.xoff_char {
                st.held = true;
            } else if st.dcb.out_x && b == st.dcb.xon_char {
                st.held = false;
            } else {
                st.rx.push_back(b);
            }
        }
        st.transmit();
        self.cond.notify_all();
    }

    /// `ReadFile` with zero timeouts: whatever has arrived, up to `buf.len()`.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut st = self.state.lock();
        let n = buf.len().min(st.rx.len());
        for (dst, src) in buf.iter_mut().zip(st.rx.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Queue `bytes` for transmission.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut st = self.state.lock();
        st.tx.extend(bytes);
        st.transmit();
        self.cond.notify_all();
        bytes.len()
    }

    /// `TransmitCommChar`: send ahead of queued output, ignoring XOFF.
    pub fn transmit_char(&self, c: u8) {
        self.state.lock().line.push(c);
    }

    /// `ClearCommError` queue counts as (received, waiting to send).
    #[must_use]
    pub fn queue_status(&self) -> (usize, usize) {
        let st = self.state.lock();
        (st.rx.len(), st.tx.len())
    }

    /// `PurgeComm`.
    pub fn purge(&self, flags: u32) {
        let mut st = self.state.lock();
        if flags & (PURGE_RXABORT | PURGE_RXCLEAR) != 0 {
            st.rx.clear();
        }
        if flags & (PURGE_TXABORT | PURGE_TXCLEAR) != 0 {
            st.tx.clear();
        }
        self.cond.notify_all();
    }

    /// Park until input arrives or `slice` elapses.
    pub fn wait_input(&self, slice: Duration) {
        let mut st = self.state.lock();
        if st.rx.is_empty() {
            let _ = self.cond.wait_for(&mut st, slice);
        }
    }

    /// Park until the transmit queue empties or `slice` elapses. Returns
    /// whether it is empty.
    pub fn wait_drained(&self, slice: Duration) -> bool {
        let mut st = self.state.lock();
        if !st.tx.is_empty() {
            let _ = self.cond.wait_for(&mut st, slice);
        }
        st.tx.is_empty()
    }

    /// Take what went out on the line so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().line)
    }

    #[must_use]
    pub fn breaks_sent(&self) -> usize {
        self.state.lock().breaks
    }

    #[must_use]
    pub fn is_breaking(&self) -> bool {
        self.state.lock().breaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_rates_are_refused() {
        let port = SerialPort::new();
        let dcb = Dcb {
            baud_rate: 31250,
            ..Dcb::default()
        };
        assert_eq!(port.set_dcb(dcb), Err(WinError::INVALID_PARAMETER));
        let dcb = Dcb {
            baud_rate: 115_200,
            byte_size: 7,
            ..Dcb::default()
        };
        port.set_dcb(dcb).unwrap();
        assert_eq!(port.dcb().baud_rate, 115_200);
    }

    #[test]
    fn xoff_from_the_line_holds_output() {
        let port = SerialPort::new();
        port.set_dcb(Dcb {
            out_x: true,
            ..Dcb::default()
        })
        .unwrap();
        port.inject(b"a\x13b");
        port.write(b"held");
        assert_eq!(port.take_output(), b"");
        assert_eq!(port.queue_status(), (2, 4));
        port.inject(b"\x11");
        assert_eq!(port.take_output(), b"held");
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn cts_flow_control() {
        let port = SerialPort::new();
        port.set_dcb(Dcb {
            outx_cts_flow: true,
            ..Dcb::default()
        })
        .unwrap();
        port.set_modem_inputs(MS_DSR_ON);
        port.write(b"x");
        assert!(!port.wait_drained(Duration::from_millis(1)));
        port.set_modem_inputs(MS_DSR_ON | MS_CTS_ON);
        assert!(port.wait_drained(Duration::from_millis(1)));
        assert_eq!(port.take_output(), b"x");
    }

    #[test]
    fn escape_functions_drive_lines_and_breaks() {
        let port = SerialPort::new();
        port.escape(CLRDTR).unwrap();
        port.escape(CLRRTS).unwrap();
        assert_eq!(port.output_lines(), (false, false));
        port.escape(SETBREAK).unwrap();
        assert!(port.is_breaking());
        port.escape(CLRBREAK).unwrap();
        assert_eq!(port.breaks_sent(), 1);
        assert_eq!(port.escape(42), Err(WinError::INVALID_PARAMETER));
    }
}
