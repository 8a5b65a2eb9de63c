//! Device classes, device numbers and POSIX path classification.

use crate::flags::{S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFSOCK};

/// Which handle variant serves a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Pipe,
    Fifo,
    Socket,
    Tape,
    Floppy,
    Disk,
    Mem,
    Null,
    Zero,
    Console,
    Serial,
    PtyMaster,
    PtySlave,
    Registry,
    ProcSys,
    ProcSelf,
    Windows,
}

impl DeviceClass {
    /// Mode reported by a plain `fstat` before variant overrides.
    #[must_use]
    pub const fn default_mode(self) -> u32 {
        match self {
            Self::Pipe | Self::Fifo => S_IFIFO | 0o600,
            Self::Socket => S_IFSOCK | 0o600,
            Self::Floppy | Self::Disk => S_IFBLK | 0o660,
            Self::Console | Self::PtySlave => S_IFCHR | 0o620,
            Self::Serial => S_IFCHR | 0o660,
            Self::Tape
            | Self::Mem
            | Self::Null
            | Self::Zero
            | Self::Windows
            | Self::PtyMaster => S_IFCHR | 0o666,
            Self::Registry | Self::ProcSys | Self::ProcSelf => S_IFDIR | 0o555,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
            Self::Tape => "tape",
            Self::Floppy => "floppy",
            Self::Disk => "disk",
            Self::Mem => "mem",
            Self::Null => "null",
            Self::Zero => "zero",
            Self::Console => "console",
            Self::Serial => "serial",
            Self::PtyMaster => "ptymaster",
            Self::PtySlave => "ptyslave",
            Self::Registry => "registry",
            Self::ProcSys => "procsys",
            Self::ProcSelf => "procself",
            Self::Windows => "windows",
        }
    }
}

// ---------------------------------------------------------------------------
// Device numbers
// ---------------------------------------------------------------------------

pub const MEM_MAJOR: u32 = 1;
pub const FLOPPY_MAJOR: u32 = 2;
pub const SERIAL_MAJOR: u32 = 4;
pub const TTY_MAJOR: u32 = 5;
pub const SD_MAJOR: u32 = 8;
pub const TAPE_MAJOR: u32 = 9;
pub const WINDOWS_MAJOR: u32 = 13;
pub const PTS_MAJOR: u32 = 136;
/// Pipes, sockets and the virtual filesystems.
pub const VIRT_MAJOR: u32 = 0;

/// Minor offset of the no-rewind tape nodes.
pub const NST_MINOR_BASE: u32 = 128;
/// Minor of `/dev/ttyS0`.
pub const SERIAL_MINOR_BASE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl DeviceId {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Packed `dev_t`.
    #[must_use]
    pub const fn rdev(self) -> u64 {
        ((self.major as u64) << 16) | self.minor as u64
    }
}

// ---------------------------------------------------------------------------
// Path classification
// ---------------------------------------------------------------------------

/// What a POSIX path names, as far as the device layer is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePath {
    Null,
    Zero,
    /// `/dev/mem` (1), `/dev/kmem` (2) or `/dev/port` (4).
    Mem { unit: u32 },
    Tape { unit: usize, rewind: bool },
    Floppy { unit: usize },
    Disk { drive: usize, partition: u32 },
    Console,
    /// `/dev/ttyS<unit>`.
    Serial { unit: usize },
    /// `/dev/ptmx`.
    Ptmx,
    /// `/dev/tty<index>`, the slave side of a pty.
    PtySlave { index: u32 },
    Windows,
    /// Remainder below `/proc/registry`, with its leading `/`.
    Registry(String),
    /// Remainder below `/proc/sys`.
    ProcSys(String),
    /// `/proc/self` or `/proc/<pid>`, with the remainder.
    Proc { pid: Option<u32>, rest: String },
}

impl DevicePath {
    #[must_use]
    pub fn class(&self) -> DeviceClass {
        match self {
            Self::Null => DeviceClass::Null,
            Self::Zero => DeviceClass::Zero,
            Self::Mem { .. } => DeviceClass::Mem,
            Self::Tape { .. } => DeviceClass::Tape,
            Self::Floppy { .. } => DeviceClass::Floppy,
            Self::Disk { .. } => DeviceClass::Disk,
            Self::Console => DeviceClass::Console,
            Self::Serial { .. } => DeviceClass::Serial,
            Self::Ptmx => DeviceClass::PtyMaster,
            Self::PtySlave { .. } => DeviceClass::PtySlave,
            Self::Windows => DeviceClass::Windows,
            Self::Registry(_) => DeviceClass::Registry,
            Self::ProcSys(_) => DeviceClass::ProcSys,
            Self::Proc { .. } => DeviceClass::ProcSelf,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::Null => DeviceId::new(MEM_MAJOR, 3),
            Self::Zero => DeviceId::new(MEM_MAJOR, 5),
            Self::Mem { unit } => DeviceId::new(MEM_MAJOR, *unit),
            Self::Tape { unit, rewind } => {
                let base = if *rewind { 0 } else { NST_MINOR_BASE };
                DeviceId::new(TAPE_MAJOR, base + *unit as u32)
            }
            Self::Floppy { unit } => DeviceId::new(FLOPPY_MAJOR, *unit as u32),
            Self::Disk { drive, partition } => {
                DeviceId::new(SD_MAJOR, *drive as u32 * 16 + *partition)
            }
            Self::Console => DeviceId::new(TTY_MAJOR, 1),
            Self::Serial { unit } => DeviceId::new(SERIAL_MAJOR, SERIAL_MINOR_BASE + *unit as u32),
            Self::Ptmx => DeviceId::new(TTY_MAJOR, 2),
            Self::PtySlave { index } => DeviceId::new(PTS_MAJOR, *index),
            Self::Windows => DeviceId::new(WINDOWS_MAJOR, 0),
            Self::Registry(_) => DeviceId::new(VIRT_MAJOR, 1),
            Self::ProcSys(_) => DeviceId::new(VIRT_MAJOR, 2),
            Self::Proc { .. } => DeviceId::new(VIRT_MAJOR, 3),
        }
    }
}

fn below<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

fn unit_suffix(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Classify `path`. `None` for paths no device variant serves.
#[must_use]
pub fn parse(path: &str) -> Option<DevicePath> {
    let path = path.trim_end_matches('/');
    if let Some(rest) = below(path, "/proc/registry") {
        return Some(DevicePath::Registry(rest.to_owned()));
    }
    if let Some(rest) = below(path, "/proc/sys") {
        return Some(DevicePath::ProcSys(rest.to_owned()));
    }
    if let Some(rest) = below(path, "/proc/self") {
        return Some(DevicePath::Proc {
            pid: None,
            rest: rest.to_owned(),
        });
    }
    if let Some(after) = path.strip_prefix("/proc/") {
        let (head, rest) = after.split_at(after.find('/').unwrap_or(after.len()));
        if let Some(pid) = unit_suffix(head) {
            return Some(DevicePath::Proc {
                pid: u32::try_from(pid).ok(),
                rest: rest.to_owned(),
            });
        }
        return None;
    }
    let name = path.strip_prefix("/dev/")?;
    match name {
        "null" => return Some(DevicePath::Null),
        "zero" => return Some(DevicePath::Zero),
        "mem" => return Some(DevicePath::Mem { unit: 1 }),
        "kmem" => return Some(DevicePath::Mem { unit: 2 }),
        "port" => return Some(DevicePath::Mem { unit: 4 }),
        "console" | "conin" | "conout" | "tty" => return Some(DevicePath::Console),
        "windows" => return Some(DevicePath::Windows),
        "ptmx" => return Some(DevicePath::Ptmx),
        _ => {}
    }
    if let Some(unit) = name.strip_prefix("ttyS").and_then(unit_suffix) {
        return Some(DevicePath::Serial { unit });
    }
    if let Some(index) = name.strip_prefix("tty").and_then(unit_suffix) {
        return Some(DevicePath::PtySlave {
            index: u32::try_from(index).ok()?,
        });
    }
    if let Some(unit) = name.strip_prefix("nst").and_then(unit_suffix) {
        return Some(DevicePath::Tape {
            unit,
            rewind: false,
        });
    }
    if let Some(unit) = name.strip_prefix("st").and_then(unit_suffix) {
        return Some(DevicePath::Tape { unit, rewind: true });
    }
    if let Some(unit) = name.strip_prefix("fd").and_then(unit_suffix) {
        return Some(DevicePath::Floppy { unit });
    }
    if let Some(rest) = name.strip_prefix("sd") {
        let mut chars = rest.chars();
        let letter = chars.next().filter(char::is_ascii_lowercase)?;
        let tail = chars.as_str();
        let partition = if tail.is_empty() {
            0
        } else {
            u32::try_from(unit_suffix(tail)?).ok()?
        };
        return Some(DevicePath::Disk {
            drive: usize::from(letter as u8 - b'a'),
            partition,
        });
    }
    None
}

/// Inode number derived from a name: the first eight bytes of its BLAKE3 hash.
#[must_use]
pub fn hash_name(name: &str) -> u64 {
    let digest = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
