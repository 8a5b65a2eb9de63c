//! Terminal attributes and the line discipline.
//!
//! [`LineDiscipline`] turns raw keystrokes into what `read` returns:
//! input translation (`ISTRIP`, `IGNCR`, `ICRNL`, `INLCR`), signal
//! characters (`ISIG`), flow control (`IXON`) and canonical line editing
//! with echo. Output post-processing lives in [`process_output`].

use std::collections::VecDeque;

use crate::signal::{SIGINT, SIGQUIT, SIGTSTP};

pub const NCCS: usize = 32;

// c_cc indices
pub const VINTR: usize = 0;
pub const VQUIT: usize = 1;
pub const VERASE: usize = 2;
pub const VKILL: usize = 3;
pub const VEOF: usize = 4;
pub const VTIME: usize = 5;
pub const VMIN: usize = 6;
pub const VSTART: usize = 8;
pub const VSTOP: usize = 9;
pub const VSUSP: usize = 10;
pub const VEOL: usize = 11;
pub const VWERASE: usize = 14;
pub const VLNEXT: usize = 15;

// c_iflag
pub const IGNBRK: u32 = 0o1;
pub const BRKINT: u32 = 0o2;
pub const IGNPAR: u32 = 0o4;
pub const PARMRK: u32 = 0o10;
pub const INPCK: u32 = 0o20;
pub const ISTRIP: u32 = 0o40;
pub const INLCR: u32 = 0o100;
pub const IGNCR: u32 = 0o200;
pub const ICRNL: u32 = 0o400;
pub const IXON: u32 = 0o2000;
pub const IXANY: u32 = 0o4000;
pub const IXOFF: u32 = 0o10000;

// c_oflag
pub const OPOST: u32 = 0o1;
pub const ONLCR: u32 = 0o4;
pub const OCRNL: u32 = 0o10;

// c_cflag
pub const CBAUD: u32 = 0o10017;
pub const B0: u32 = 0;
pub const B50: u32 = 0o1;
pub const B75: u32 = 0o2;
pub const B110: u32 = 0o3;
pub const B134: u32 = 0o4;
pub const B150: u32 = 0o5;
pub const B200: u32 = 0o6;
pub const B300: u32 = 0o7;
pub const B600: u32 = 0o10;
pub const B1200: u32 = 0o11;
pub const B1800: u32 = 0o12;
pub const B2400: u32 = 0o13;
pub const B4800: u32 = 0o14;
pub const B9600: u32 = 0o15;
pub const B19200: u32 = 0o16;
pub const B38400: u32 = 0o17;
pub const B57600: u32 = 0o10001;
pub const B115200: u32 = 0o10002;
pub const B230400: u32 = 0o10003;
pub const CSIZE: u32 = 0o60;
pub const CS5: u32 = 0;
pub const CS6: u32 = 0o20;
pub const CS7: u32 = 0o40;
pub const CS8: u32 = 0o60;
pub const CSTOPB: u32 = 0o100;
pub const CREAD: u32 = 0o200;
pub const PARENB: u32 = 0o400;
pub const PARODD: u32 = 0o1000;
pub const HUPCL: u32 = 0o2000;
pub const CLOCAL: u32 = 0o4000;
/// Raise RTS only while there is room to receive.
pub const CRTSXOFF: u32 = 0x2000_0000;
pub const CRTSCTS: u32 = 0x8000_0000;

// c_lflag
pub const ISIG: u32 = 0o1;
pub const ICANON: u32 = 0o2;
pub const ECHO: u32 = 0o10;
pub const ECHOE: u32 = 0o20;
pub const ECHOK: u32 = 0o40;
pub const ECHONL: u32 = 0o100;
pub const NOFLSH: u32 = 0o200;
pub const TOSTOP: u32 = 0o400;
pub const IEXTEN: u32 = 0o100000;

// tcsetattr actions
pub const TCSANOW: i32 = 0;
pub const TCSADRAIN: i32 = 1;
pub const TCSAFLUSH: i32 = 2;

// tcflow actions
pub const TCOOFF: i64 = 0;
pub const TCOON: i64 = 1;
pub const TCIOFF: i64 = 2;
pub const TCION: i64 = 3;

// tcflush queues
pub const TCIFLUSH: i64 = 0;
pub const TCOFLUSH: i64 = 1;
pub const TCIOFLUSH: i64 = 2;

/// Terminal attributes (like `struct termios`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termios {
    /// Input mode flags.
    pub c_iflag: u32,
    /// Output mode flags.
    pub c_oflag: u32,
    /// Control mode flags.
    pub c_cflag: u32,
    /// Local mode flags.
    pub c_lflag: u32,
    /// Control characters.
    pub c_cc: [u8; NCCS],
    pub c_ispeed: u32,
    pub c_ospeed: u32,
}

impl Default for Termios {
    /// The attributes a freshly opened console starts with.
    fn default() -> Self {
        let mut c_cc = [0u8; NCCS];
        c_cc[VINTR] = 0x03;
        c_cc[VQUIT] = 0x1c;
        c_cc[VERASE] = 0x7f;
        c_cc[VKILL] = 0x15;
        c_cc[VEOF] = 0x04;
        c_cc[VTIME] = 0;
        c_cc[VMIN] = 1;
        c_cc[VSTART] = 0x11;
        c_cc[VSTOP] = 0x13;
        c_cc[VSUSP] = 0x1a;
        c_cc[VWERASE] = 0x17;
        c_cc[VLNEXT] = 0x16;
        Self {
            c_iflag: ICRNL | IXON,
            c_oflag: OPOST | ONLCR,
            c_cflag: B38400 | CS8 | CREAD,
            c_lflag: ISIG | ICANON | ECHO | ECHOE | ECHOK | IEXTEN,
            c_cc,
            c_ispeed: B38400,
            c_ospeed: B38400,
        }
    }
}

impl Termios {
    #[must_use]
    pub const fn canonical(&self) -> bool {
        self.c_lflag & ICANON != 0
    }

    /// `cfmakeraw`.
    pub fn make_raw(&mut self) {
        self.c_iflag &= !(IGNBRK | BRKINT | ISTRIP | INLCR | IGNCR | ICRNL | IXON);
        self.c_oflag &= !OPOST;
        self.c_lflag &= !(ECHO | ECHONL | ICANON | ISIG | IEXTEN);
        self.c_cc[VMIN] = 1;
        self.c_cc[VTIME] = 0;
    }

    /// Output speed code (`cfgetospeed`).
    #[must_use]
    pub const fn speed(&self) -> u32 {
        self.c_cflag & CBAUD
    }

    /// `cfsetspeed`: the code goes into `c_cflag` and both speed fields.
    pub fn set_speed(&mut self, speed: u32) {
        self.c_cflag = (self.c_cflag & !CBAUD) | (speed & CBAUD);
        self.c_ispeed = speed & CBAUD;
        self.c_ospeed = speed & CBAUD;
    }

    fn is_cc(&self, index: usize, c: u8) -> bool {
        // A zero control character is disabled.
        self.c_cc[index] != 0 && self.c_cc[index] == c
    }
}

/// Baud rate of a `B*` speed code.
#[must_use]
pub const fn speed_to_baud(speed: u32) -> Option<u32> {
    Some(match speed {
        B0 => 0,
        B50 => 50,
        B75 => 75,
        B110 => 110,
        B134 => 134,
        B150 => 150,
        B200 => 200,
        B300 => 300,
        B600 => 600,
        B1200 => 1200,
        B1800 => 1800,
        B2400 => 2400,
        B4800 => 4800,
        B9600 => 9600,
        B19200 => 19200,
        B38400 => 38400,
        B57600 => 57600,
        B115200 => 115_200,
        B230400 => 230_400,
        _ => return None,
    })
}

/// The `B*` code for `baud`, if there is one.
#[must_use]
pub const fn baud_to_speed(baud: u32) -> Option<u32> {
    Some(match baud {
        0 => B0,
        50 => B50,
        75 => B75,
        110 => B110,
        134 => B134,
        150 => B150,
        200 => B200,
        300 => B300,
        600 => B600,
        1200 => B1200,
        1800 => B1800,
        2400 => B2400,
        4800 => B4800,
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115_200 => B115200,
        230_400 => B230400,
        _ => return None,
    })
}

/// `struct winsize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Winsize {
    pub ws_row: u16,
    pub ws_col: u16,
    pub ws_xpixel: u16,
    pub ws_ypixel: u16,
}

// ---------------------------------------------------------------------------
// Line discipline
// ---------------------------------------------------------------------------

/// Outcome of feeding one keystroke.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InputEffect {
    /// Bytes to echo back to the screen.
    pub echo: Vec<u8>,
    /// Signal generated by the keystroke.
    pub signal: Option<i32>,
}

/// Input state of one terminal.
#[derive(Debug, Default)]
pub struct LineDiscipline {
    /// Line being edited (canonical mode).
    line: Vec<u8>,
    /// Completed lines. An empty entry is an end-of-file mark.
    lines: VecDeque<Vec<u8>>,
    /// Bytes ready for a non-canonical read.
    raw: VecDeque<u8>,
    /// Output suspended by the stop character.
    stopped: bool,
}

impl LineDiscipline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one keystroke.
    pub fn input(&mut self, tio: &Termios, byte: u8) -> InputEffect {
        let mut effect = InputEffect::default();
        let mut c = byte;
        if tio.c_iflag & ISTRIP != 0 {
            c &= 0x7f;
        }
        if c == b'\r' {
            if tio.c_iflag & IGNCR != 0 {
                return effect;
            }
            if tio.c_iflag & ICRNL != 0 {
                c = b'\n';
            }
        } else if c == b'\n' && tio.c_iflag & INLCR != 0 {
            c = b'\r';
        }

        if tio.c_lflag & ISIG != 0 {
            let signal = if tio.is_cc(VINTR, c) {
                Some(SIGINT)
            } else if tio.is_cc(VQUIT, c) {
                Some(SIGQUIT)
            } else if tio.is_cc(VSUSP, c) {
                Some(SIGTSTP)
            } else {
                None
            };
            if signal.is_some() {
                if tio.c_lflag & NOFLSH == 0 {
                    self.flush();
                }
                if tio.c_lflag & ECHO != 0 {
                    effect.echo.extend([b'^', (c & 0x1f) + b'@', b'\n']);
                }
                effect.signal = signal;
                return effect;
            }
        }

        if tio.c_iflag & IXON != 0 {
            if tio.is_cc(VSTOP, c) {
                self.stopped = true;
                return effect;
            }
            if tio.is_cc(VSTART, c) {
                self.stopped = false;
                return effect;
            }
        }

        let echo = tio.c_lflag & ECHO != 0;
        if !tio.canonical() {
            self.raw.push_back(c);
            if echo {
                effect.echo.push(c);
            }
            return effect;
        }

        if tio.is_cc(VERASE, c) {
            if self.line.pop().is_some() && echo && tio.c_lflag & ECHOE != 0 {
                effect.echo.extend_from_slice(b"\x08 \x08");
            }
        } else if tio.c_lflag & IEXTEN != 0 && tio.is_cc(VWERASE, c) {
            let erased = self.erase_word();
            if echo && tio.c_lflag & ECHOE != 0 {
                for _ in 0..erased {
                    effect.echo.extend_from_slice(b"\x08 \x08");
                }
            }
        } else if tio.is_cc(VKILL, c) {
            let erased = self.line.len();
            self.line.clear();
            if echo {
                if tio.c_lflag & ECHOE != 0 {
                    for _ in 0..erased {
                        effect.echo.extend_from_slice(b"\x08 \x08");
                    }
                } else if tio.c_lflag & ECHOK != 0 {
                    effect.echo.extend([c, b'\n']);
                }
            }
        } else if tio.is_cc(VEOF, c) {
            // An empty completed line reads back as end of file.
            self.lines.push_back(std::mem::take(&mut self.line));
        } else if c == b'\n' || tio.is_cc(VEOL, c) {
            self.line.push(c);
            self.lines.push_back(std::mem::take(&mut self.line));
            if echo || (c == b'\n' && tio.c_lflag & ECHONL != 0) {
                effect.echo.push(c);
            }
        } else {
            self.line.push(c);
            if echo {
                effect.echo.push(c);
            }
        }
        effect
    }

    fn erase_word(&mut self) -> usize {
        let before = self.line.len();
        while self.line.last() == Some(&b' ') {
            self.line.pop();
        }
        while self.line.last().is_some_and(|c| *c != b' ') {
            self.line.pop();
        }
        before - self.line.len()
    }

    /// Whether a read would return without waiting (data or end of file).
    #[must_use]
    pub fn readable(&self, tio: &Termios) -> bool {
        if tio.canonical() {
            !self.lines.is_empty()
        } else {
            !self.raw.is_empty() || tio.c_cc[VMIN] == 0
        }
    }

    /// Bytes a read could return now (`FIONREAD`).
    #[must_use]
    pub fn available(&self) -> usize {
        self.lines.iter().map(Vec::len).sum::<usize>() + self.raw.len()
    }

    /// Move ready input into `buf`. Canonical reads return at most one line;
    /// `Some(0)` is end of file, `None` means nothing is ready.
    pub fn read(&mut self, tio: &Termios, buf: &mut [u8]) -> Option<usize> {
        if tio.canonical() {
            let line = self.lines.front_mut()?;
            if line.is_empty() {
                self.lines.pop_front();
                return Some(0);
            }
            let n = buf.len().min(line.len());
            buf[..n].copy_from_slice(&line[..n]);
            line.drain(..n);
            if line.is_empty() {
                self.lines.pop_front();
            }
            return Some(n);
        }
        if self.raw.is_empty() {
            return if tio.c_cc[VMIN] == 0 { Some(0) } else { None };
        }
        let n = buf.len().min(self.raw.len());
        for (dst, src) in buf.iter_mut().zip(self.raw.drain(..n)) {
            *dst = src;
        }
        Some(n)
    }

    /// Discard pending input, edited and completed.
    pub fn flush(&mut self) {
        self.line.clear();
        self.lines.clear();
        self.raw.clear();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Apply output post-processing (`OPOST` with `ONLCR`/`OCRNL`).
#[must_use]
pub fn process_output(tio: &Termios, bytes: &[u8]) -> Vec<u8> {
    if tio.c_oflag & OPOST == 0 {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    for &c in bytes {
        match c {
            b'\n' if tio.c_oflag & ONLCR != 0 => out.extend_from_slice(b"\r\n"),
            b'\r' if tio.c_oflag & OCRNL != 0 => out.push(b'\n'),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ld: &mut LineDiscipline, tio: &Termios, input: &[u8]) -> Vec<u8> {
        let mut echo = Vec::new();
        for &b in input {
            echo.extend(ld.input(tio, b).echo);
        }
        echo
    }

    fn read_all(ld: &mut LineDiscipline, tio: &Termios) -> Option<Vec<u8>> {
        let mut buf = [0u8; 64];
        ld.read(tio, &mut buf).map(|n| buf[..n].to_vec())
    }

    #[test]
    fn canonical_erase_and_kill() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        feed(&mut ld, &tio, b"helo\x7flo\r");
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"hello\n");
        feed(&mut ld, &tio, b"garbage\x15ok\n");
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"ok\n");
        feed(&mut ld, &tio, b"one two\x17three\n");
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"one three\n");
    }

    #[test]
    fn eof_at_line_start_reads_zero() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        feed(&mut ld, &tio, b"abc\x04\x04");
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"abc");
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"");
        assert_eq!(read_all(&mut ld, &tio), None);
    }

    #[test]
    fn partial_line_waits() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        feed(&mut ld, &tio, b"abc");
        assert!(!ld.readable(&tio));
        assert_eq!(read_all(&mut ld, &tio), None);
    }

    #[test]
    fn isig_generates_signal_and_flushes() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        feed(&mut ld, &tio, b"done\nabc");
        let effect = ld.input(&tio, 0x03);
        assert_eq!(effect.signal, Some(SIGINT));
        assert_eq!(effect.echo, b"^C\n");
        assert_eq!(ld.available(), 0);
    }

    #[test]
    fn raw_mode_passes_bytes_through() {
        let mut tio = Termios::default();
        tio.make_raw();
        let mut ld = LineDiscipline::new();
        let echo = feed(&mut ld, &tio, b"a\r\x03");
        assert!(echo.is_empty());
        assert_eq!(read_all(&mut ld, &tio).unwrap(), b"a\r\x03");
    }

    #[test]
    fn echo_shows_erasure() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        assert_eq!(feed(&mut ld, &tio, b"ab\x7f"), b"ab\x08 \x08");
    }

    #[test]
    fn ixon_stop_and_start() {
        let tio = Termios::default();
        let mut ld = LineDiscipline::new();
        feed(&mut ld, &tio, b"\x13");
        assert!(ld.is_stopped());
        feed(&mut ld, &tio, b"\x11");
        assert!(!ld.is_stopped());
        assert_eq!(ld.available(), 0);
    }

    #[test]
    fn speed_codes() {
        let mut tio = Termios::default();
        assert_eq!(speed_to_baud(tio.speed()), Some(38400));
        tio.set_speed(B115200);
        assert_eq!(tio.c_cflag & CSIZE, CS8);
        assert_eq!(speed_to_baud(tio.speed()), Some(115_200));
        assert_eq!(baud_to_speed(9600), Some(B9600));
        assert_eq!(baud_to_speed(31250), None);
        assert_eq!(speed_to_baud(0o10017), None);
    }

    #[test]
    fn output_translates_newlines() {
        let tio = Termios::default();
        assert_eq!(process_output(&tio, b"a\nb"), b"a\r\nb");
        let mut raw = tio;
        raw.make_raw();
        assert_eq!(process_output(&raw, b"a\nb"), b"a\nb");
    }
}
