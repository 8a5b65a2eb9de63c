//! Ioctl request numbers and argument records.

use ntposix_native::msgqueue::WindowMessage;

use crate::termios::{Termios, Winsize};

// ---------------------------------------------------------------------------
// Generic and terminal requests
// ---------------------------------------------------------------------------

pub const TCGETS: u64 = 0x5401;
pub const TCSETS: u64 = 0x5402;
pub const TCSETSW: u64 = 0x5403;
pub const TCSETSF: u64 = 0x5404;
pub const TCSBRK: u64 = 0x5409;
pub const TCXONC: u64 = 0x540A;
pub const TCFLSH: u64 = 0x540B;
pub const TIOCGWINSZ: u64 = 0x5413;
pub const TIOCSWINSZ: u64 = 0x5414;
pub const TIOCMGET: u64 = 0x5415;
pub const TIOCMBIS: u64 = 0x5416;
pub const TIOCMBIC: u64 = 0x5417;
pub const TIOCMSET: u64 = 0x5418;
pub const FIONREAD: u64 = 0x541B;
pub const FIONBIO: u64 = 0x5421;
pub const TIOCSBRK: u64 = 0x5427;
pub const TIOCCBRK: u64 = 0x5428;
pub const TIOCGPTN: u64 = 0x8004_5430;

// Modem line bits for TIOCM*.
pub const TIOCM_DTR: i64 = 0x002;
pub const TIOCM_RTS: i64 = 0x004;
pub const TIOCM_CTS: i64 = 0x020;
pub const TIOCM_CAR: i64 = 0x040;
pub const TIOCM_RNG: i64 = 0x080;
pub const TIOCM_DSR: i64 = 0x100;

// ---------------------------------------------------------------------------
// Magnetic tape (mtio)
// ---------------------------------------------------------------------------

pub const MTIOCTOP: u64 = 0x4008_6d01;
pub const MTIOCGET: u64 = 0x8030_6d02;
pub const MTIOCPOS: u64 = 0x8008_6d03;

pub const MTRESET: i16 = 0;
pub const MTFSF: i16 = 1;
pub const MTBSF: i16 = 2;
pub const MTFSR: i16 = 3;
pub const MTBSR: i16 = 4;
pub const MTWEOF: i16 = 5;
pub const MTREW: i16 = 6;
pub const MTOFFL: i16 = 7;
pub const MTNOP: i16 = 8;
pub const MTRETEN: i16 = 9;
pub const MTBSFM: i16 = 10;
pub const MTFSFM: i16 = 11;
pub const MTEOM: i16 = 12;
pub const MTERASE: i16 = 13;
pub const MTSETBLK: i16 = 20;
pub const MTSETDENSITY: i16 = 21;
pub const MTSEEK: i16 = 22;
pub const MTTELL: i16 = 23;
pub const MTSETDRVBUFFER: i16 = 24;
pub const MTFSS: i16 = 25;
pub const MTBSS: i16 = 26;
pub const MTWSM: i16 = 27;
pub const MTLOCK: i16 = 28;
pub const MTUNLOCK: i16 = 29;
pub const MTLOAD: i16 = 30;
pub const MTUNLOAD: i16 = 31;
pub const MTCOMPRESSION: i16 = 32;

/// Drive type reported in `mt_type`.
pub const MT_ISSCSI2: i64 = 0x72;

pub const GMT_EOF: i64 = 0x8000_0000;
pub const GMT_BOT: i64 = 0x4000_0000;
pub const GMT_EOT: i64 = 0x2000_0000;
pub const GMT_SM: i64 = 0x1000_0000;
pub const GMT_EOD: i64 = 0x0800_0000;
pub const GMT_WR_PROT: i64 = 0x0400_0000;
pub const GMT_ONLINE: i64 = 0x0100_0000;
pub const GMT_DR_OPEN: i64 = 0x0004_0000;
pub const GMT_HW_COMP: i64 = 0x0002_0000;

/// `MTSETDRVBUFFER` argument layout.
pub const MT_ST_OPTIONS: i32 = 0xf000_0000_u32 as i32;
pub const MT_ST_BOOLEANS: i32 = 0x1000_0000;
pub const MT_ST_SETBOOLEANS: i32 = 0x3000_0000;
pub const MT_ST_CLEARBOOLEANS: i32 = 0x4000_0000;
pub const MT_ST_BUFFER_WRITES: i32 = 0x1;
pub const MT_ST_TWO_FM: i32 = 0x10;
pub const MT_ST_AUTO_LOCK: i32 = 0x40;
pub const MT_ST_ECC: i32 = 0x2000;
pub const MT_ST_PADDING: i32 = 0x4000;
pub const MT_ST_REPORT_SM: i32 = 0x8000;

/// `struct mtop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MtOp {
    pub mt_op: i16,
    pub mt_count: i32,
}

/// `struct mtget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MtGet {
    pub mt_type: i64,
    pub mt_resid: i64,
    /// Block size in the low 24 bits, density in the high 8.
    pub mt_dsreg: i64,
    pub mt_gstat: i64,
    pub mt_erreg: i64,
    pub mt_fileno: i32,
    pub mt_blkno: i32,
}

// ---------------------------------------------------------------------------
// Disks
// ---------------------------------------------------------------------------

pub const HDIO_GETGEO: u64 = 0x0301;
pub const BLKGETSIZE: u64 = 0x1260;
pub const BLKSSZGET: u64 = 0x1268;
pub const BLKGETSIZE64: u64 = 0x8008_1272;

/// `struct hd_geometry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdGeometry {
    pub heads: u8,
    pub sectors: u8,
    pub cylinders: u16,
    pub start: u64,
}

// ---------------------------------------------------------------------------
// Raw device buffer control
// ---------------------------------------------------------------------------

pub const RDIOCDOP: u64 = 0x4010_7280;
pub const RDIOCGET: u64 = 0x8008_7281;
pub const RDSETBLK: u32 = 1;

/// `struct rdop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdOp {
    pub rd_op: u32,
    pub rd_parm: u32,
}

// ---------------------------------------------------------------------------
// /dev/windows
// ---------------------------------------------------------------------------

/// Subsequent writes post (queue) messages.
pub const WINDOWS_POST: u64 = 0;
/// Subsequent writes send (dispatch) messages.
pub const WINDOWS_SEND: u64 = 1;
/// Set the window reads are filtered on (0 = any).
pub const WINDOWS_HWND: u64 = 2;

/// Typed ioctl argument.
#[derive(Debug)]
pub enum IoctlArg<'a> {
    None,
    Int(i64),
    IntOut(&'a mut i64),
    Mtop(&'a mut MtOp),
    Mtget(&'a mut MtGet),
    Termios(&'a mut Termios),
    Winsize(&'a mut Winsize),
    Geometry(&'a mut HdGeometry),
    RdOp(&'a RdOp),
    RdGet(&'a mut u32),
    Message(&'a mut WindowMessage),
}

impl IoctlArg<'_> {
    /// The integer value, treating absent as 0.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        match self {
            Self::None => Some(0),
            Self::Int(v) => Some(*v),
            Self::IntOut(v) => Some(**v),
            _ => None,
        }
    }
}
