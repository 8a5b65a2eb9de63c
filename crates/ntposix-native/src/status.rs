//! Native status codes.
//!
//! Two numbering spaces cross the native boundary: Win32 error codes (the
//! values `GetLastError` reports after device and registry calls) and
//! NTSTATUS values returned by object-manager and pipe calls. Both are kept
//! opaque here; the descriptor layer owns the mapping onto errno.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Win32 error codes
// ---------------------------------------------------------------------------

/// A Win32 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("win32 error {0}")]
pub struct WinError(pub u32);

impl WinError {
    pub const INVALID_FUNCTION: Self = Self(1);
    pub const FILE_NOT_FOUND: Self = Self(2);
    pub const PATH_NOT_FOUND: Self = Self(3);
    pub const ACCESS_DENIED: Self = Self(5);
    pub const INVALID_HANDLE: Self = Self(6);
    pub const NOT_ENOUGH_MEMORY: Self = Self(8);
    pub const INVALID_DATA: Self = Self(13);
    pub const OUTOFMEMORY: Self = Self(14);
    pub const NO_MORE_FILES: Self = Self(18);
    pub const WRITE_PROTECT: Self = Self(19);
    pub const NOT_READY: Self = Self(21);
    pub const CRC: Self = Self(23);
    pub const BAD_LENGTH: Self = Self(24);
    pub const SECTOR_NOT_FOUND: Self = Self(27);
    pub const SHARING_VIOLATION: Self = Self(32);
    pub const LOCK_VIOLATION: Self = Self(33);
    pub const HANDLE_DISK_FULL: Self = Self(39);
    pub const NOT_SUPPORTED: Self = Self(50);
    pub const BAD_NETPATH: Self = Self(53);
    pub const DEV_NOT_EXIST: Self = Self(55);
    pub const NETWORK_ACCESS_DENIED: Self = Self(65);
    pub const FILE_EXISTS: Self = Self(80);
    pub const INVALID_PARAMETER: Self = Self(87);
    pub const BROKEN_PIPE: Self = Self(109);
    pub const DISK_FULL: Self = Self(112);
    pub const CALL_NOT_IMPLEMENTED: Self = Self(120);
    pub const INVALID_NAME: Self = Self(123);
    pub const MOD_NOT_FOUND: Self = Self(126);
    pub const NEGATIVE_SEEK: Self = Self(131);
    pub const BAD_PATHNAME: Self = Self(161);
    pub const BUSY: Self = Self(170);
    pub const ALREADY_EXISTS: Self = Self(183);
    pub const LOCKED: Self = Self(212);
    pub const PIPE_BUSY: Self = Self(231);
    pub const NO_DATA: Self = Self(232);
    pub const PIPE_NOT_CONNECTED: Self = Self(233);
    pub const MORE_DATA: Self = Self(234);
    pub const NO_MORE_ITEMS: Self = Self(259);
    pub const DIRECTORY: Self = Self(267);
    pub const NOACCESS: Self = Self(998);
    pub const END_OF_MEDIA: Self = Self(1100);
    pub const FILEMARK_DETECTED: Self = Self(1101);
    pub const BEGINNING_OF_MEDIA: Self = Self(1102);
    pub const SETMARK_DETECTED: Self = Self(1103);
    pub const NO_DATA_DETECTED: Self = Self(1104);
    pub const INVALID_BLOCK_LENGTH: Self = Self(1106);
    pub const MEDIA_CHANGED: Self = Self(1110);
    pub const BUS_RESET: Self = Self(1111);
    pub const NO_MEDIA_IN_DRIVE: Self = Self(1112);
    pub const IO_DEVICE: Self = Self(1117);
    pub const EOM_OVERFLOW: Self = Self(1129);
    pub const INVALID_WINDOW_HANDLE: Self = Self(1400);
    pub const DEVICE_IN_USE: Self = Self(2404);

    /// Media changed or bus reset: the operation may succeed when reissued.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::MEDIA_CHANGED | Self::BUS_RESET)
    }

    /// End of medium, in any of the forms a tape or disk driver reports it.
    #[must_use]
    pub const fn is_end_of_medium(self) -> bool {
        matches!(
            self,
            Self::END_OF_MEDIA | Self::EOM_OVERFLOW | Self::NO_DATA_DETECTED
        )
    }

    /// A filemark or setmark was crossed.
    #[must_use]
    pub const fn is_mark(self) -> bool {
        matches!(self, Self::FILEMARK_DETECTED | Self::SETMARK_DETECTED)
    }
}

// ---------------------------------------------------------------------------
// NTSTATUS
// ---------------------------------------------------------------------------

/// An NTSTATUS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("NTSTATUS {0:#010x}")]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const TIMEOUT: Self = Self(0x0000_0102);
    pub const BUFFER_OVERFLOW: Self = Self(0x8000_0005);
    pub const NO_MORE_ENTRIES: Self = Self(0x8000_001A);
    pub const INVALID_HANDLE: Self = Self(0xC000_0008);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D);
    pub const END_OF_FILE: Self = Self(0xC000_0011);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022);
    pub const BUFFER_TOO_SMALL: Self = Self(0xC000_0023);
    pub const OBJECT_TYPE_MISMATCH: Self = Self(0xC000_0024);
    pub const OBJECT_NAME_INVALID: Self = Self(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: Self = Self(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: Self = Self(0xC000_0035);
    pub const OBJECT_PATH_NOT_FOUND: Self = Self(0xC000_003A);
    pub const MUTANT_NOT_OWNED: Self = Self(0xC000_0046);
    pub const SEMAPHORE_LIMIT_EXCEEDED: Self = Self(0xC000_0047);
    pub const INSUFFICIENT_RESOURCES: Self = Self(0xC000_009A);
    pub const PIPE_NOT_AVAILABLE: Self = Self(0xC000_00AC);
    pub const PIPE_BUSY: Self = Self(0xC000_00AE);
    pub const PIPE_DISCONNECTED: Self = Self(0xC000_00B0);
    pub const PIPE_CLOSING: Self = Self(0xC000_00B1);
    pub const NOT_SUPPORTED: Self = Self(0xC000_00BB);
    pub const PIPE_EMPTY: Self = Self(0xC000_00D9);
    pub const PIPE_BROKEN: Self = Self(0xC000_014B);

    /// Severity bits say "error" (as opposed to success, info or warning).
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 >= 0xC000_0000
    }
}

// ---------------------------------------------------------------------------
// Short transfers
// ---------------------------------------------------------------------------

/// A transfer that stopped with an error after moving some bytes.
///
/// Device reads and writes report the byte count alongside the failure, the
/// same way `ReadFile` fills `lpNumberOfBytesRead` even when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{error} after {transferred} bytes")]
pub struct Partial {
    pub transferred: usize,
    pub error: WinError,
}

impl Partial {
    #[must_use]
    pub const fn new(transferred: usize, error: WinError) -> Self {
        Self { transferred, error }
    }

    /// Failure before any byte moved.
    #[must_use]
    pub const fn none(error: WinError) -> Self {
        Self::new(0, error)
    }
}

impl From<WinError> for Partial {
    fn from(error: WinError) -> Self {
        Self::none(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_are_media_change_and_bus_reset() {
        assert!(WinError::MEDIA_CHANGED.is_transient());
        assert!(WinError::BUS_RESET.is_transient());
        assert!(!WinError::END_OF_MEDIA.is_transient());
    }

    #[test]
    fn end_of_medium_family() {
        for e in [
            WinError::END_OF_MEDIA,
            WinError::EOM_OVERFLOW,
            WinError::NO_DATA_DETECTED,
        ] {
            assert!(e.is_end_of_medium());
            assert!(!e.is_mark());
        }
        assert!(WinError::SETMARK_DETECTED.is_mark());
    }

    #[test]
    fn ntstatus_severity() {
        assert!(NtStatus::PIPE_BROKEN.is_error());
        assert!(!NtStatus::NO_MORE_ENTRIES.is_error());
        assert!(!NtStatus::SUCCESS.is_error());
        assert_eq!(NtStatus::ACCESS_DENIED.to_string(), "NTSTATUS 0xc0000022");
    }

    #[test]
    fn partial_display_mentions_count() {
        let p = Partial::new(512, WinError::FILEMARK_DETECTED);
        assert_eq!(p.to_string(), "win32 error 1101 after 512 bytes");
    }
}
