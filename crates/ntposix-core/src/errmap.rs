//! Native status → errno translation.
//!
//! Handle variants interpret the codes they expect (end of medium, pipe
//! empty, more data) themselves and pass everything else through here, so
//! no native code reaches a caller.

use ntposix_native::{NtStatus, WinError};

use crate::errno::Errno;

/// The Win32 error table, in the order it is printed.
pub const WIN32_ERRNO_TABLE: &[(WinError, &str, Errno)] = &[
    (WinError::FILE_NOT_FOUND, "FILE_NOT_FOUND", Errno::ENOENT),
    (WinError::PATH_NOT_FOUND, "PATH_NOT_FOUND", Errno::ENOENT),
    (WinError::BAD_PATHNAME, "BAD_PATHNAME", Errno::ENOENT),
    (WinError::INVALID_NAME, "INVALID_NAME", Errno::ENOENT),
    (WinError::BAD_NETPATH, "BAD_NETPATH", Errno::ENOENT),
    (WinError::MOD_NOT_FOUND, "MOD_NOT_FOUND", Errno::ENOENT),
    (WinError::ACCESS_DENIED, "ACCESS_DENIED", Errno::EACCES),
    (WinError::SHARING_VIOLATION, "SHARING_VIOLATION", Errno::EACCES),
    (WinError::LOCK_VIOLATION, "LOCK_VIOLATION", Errno::EACCES),
    (WinError::NETWORK_ACCESS_DENIED, "NETWORK_ACCESS_DENIED", Errno::EACCES),
    (WinError::INVALID_HANDLE, "INVALID_HANDLE", Errno::EBADF),
    (WinError::NOT_ENOUGH_MEMORY, "NOT_ENOUGH_MEMORY", Errno::ENOMEM),
    (WinError::OUTOFMEMORY, "OUTOFMEMORY", Errno::ENOMEM),
    (WinError::WRITE_PROTECT, "WRITE_PROTECT", Errno::EROFS),
    (WinError::NOT_READY, "NOT_READY", Errno::ENOMEDIUM),
    (WinError::CRC, "CRC", Errno::EIO),
    (WinError::IO_DEVICE, "IO_DEVICE", Errno::EIO),
    (WinError::SECTOR_NOT_FOUND, "SECTOR_NOT_FOUND", Errno::EIO),
    (WinError::HANDLE_DISK_FULL, "HANDLE_DISK_FULL", Errno::ENOSPC),
    (WinError::DISK_FULL, "DISK_FULL", Errno::ENOSPC),
    (WinError::END_OF_MEDIA, "END_OF_MEDIA", Errno::ENOSPC),
    (WinError::EOM_OVERFLOW, "EOM_OVERFLOW", Errno::ENOSPC),
    (WinError::NO_DATA_DETECTED, "NO_DATA_DETECTED", Errno::ENOSPC),
    (WinError::BEGINNING_OF_MEDIA, "BEGINNING_OF_MEDIA", Errno::ESPIPE),
    (WinError::SETMARK_DETECTED, "SETMARK_DETECTED", Errno::ESPIPE),
    (WinError::FILEMARK_DETECTED, "FILEMARK_DETECTED", Errno::ESPIPE),
    (WinError::NOT_SUPPORTED, "NOT_SUPPORTED", Errno::ENOSYS),
    (WinError::CALL_NOT_IMPLEMENTED, "CALL_NOT_IMPLEMENTED", Errno::ENOSYS),
    (WinError::INVALID_PARAMETER, "INVALID_PARAMETER", Errno::EINVAL),
    (WinError::INVALID_FUNCTION, "INVALID_FUNCTION", Errno::EINVAL),
    (WinError::BAD_LENGTH, "BAD_LENGTH", Errno::EINVAL),
    (WinError::NEGATIVE_SEEK, "NEGATIVE_SEEK", Errno::EINVAL),
    (WinError::INVALID_BLOCK_LENGTH, "INVALID_BLOCK_LENGTH", Errno::EINVAL),
    (WinError::BROKEN_PIPE, "BROKEN_PIPE", Errno::EPIPE),
    (WinError::NO_DATA, "NO_DATA", Errno::EPIPE),
    (WinError::PIPE_BUSY, "PIPE_BUSY", Errno::EBUSY),
    (WinError::BUSY, "BUSY", Errno::EBUSY),
    (WinError::DEVICE_IN_USE, "DEVICE_IN_USE", Errno::EBUSY),
    (WinError::LOCKED, "LOCKED", Errno::EBUSY),
    (WinError::PIPE_NOT_CONNECTED, "PIPE_NOT_CONNECTED", Errno::ECOMM),
    (WinError::MORE_DATA, "MORE_DATA", Errno::EAGAIN),
    (WinError::NO_MORE_ITEMS, "NO_MORE_ITEMS", Errno::ENMFILE),
    (WinError::NO_MORE_FILES, "NO_MORE_FILES", Errno::ENMFILE),
    (WinError::ALREADY_EXISTS, "ALREADY_EXISTS", Errno::EEXIST),
    (WinError::FILE_EXISTS, "FILE_EXISTS", Errno::EEXIST),
    (WinError::DIRECTORY, "DIRECTORY", Errno::ENOTDIR),
    (WinError::NOACCESS, "NOACCESS", Errno::EFAULT),
    (WinError::MEDIA_CHANGED, "MEDIA_CHANGED", Errno::EIO),
    (WinError::BUS_RESET, "BUS_RESET", Errno::EIO),
    (WinError::NO_MEDIA_IN_DRIVE, "NO_MEDIA_IN_DRIVE", Errno::ENOMEDIUM),
    (WinError::DEV_NOT_EXIST, "DEV_NOT_EXIST", Errno::ENODEV),
];

const NTSTATUS_ERRNO_TABLE: &[(NtStatus, Errno)] = &[
    (NtStatus::OBJECT_NAME_NOT_FOUND, Errno::ENOENT),
    (NtStatus::OBJECT_PATH_NOT_FOUND, Errno::ENOENT),
    (NtStatus::OBJECT_NAME_INVALID, Errno::ENOENT),
    (NtStatus::ACCESS_DENIED, Errno::EACCES),
    (NtStatus::PIPE_BROKEN, Errno::EPIPE),
    (NtStatus::PIPE_CLOSING, Errno::EPIPE),
    (NtStatus::PIPE_DISCONNECTED, Errno::EPIPE),
    (NtStatus::PIPE_EMPTY, Errno::EAGAIN),
    (NtStatus::PIPE_BUSY, Errno::EBUSY),
    (NtStatus::PIPE_NOT_AVAILABLE, Errno::EBUSY),
    (NtStatus::INVALID_HANDLE, Errno::EBADF),
    (NtStatus::INVALID_PARAMETER, Errno::EINVAL),
    (NtStatus::OBJECT_TYPE_MISMATCH, Errno::EINVAL),
    (NtStatus::NOT_SUPPORTED, Errno::ENOSYS),
    (NtStatus::NO_MORE_ENTRIES, Errno::ENMFILE),
    (NtStatus::OBJECT_NAME_COLLISION, Errno::EEXIST),
    (NtStatus::INSUFFICIENT_RESOURCES, Errno::ENOMEM),
    (NtStatus::MUTANT_NOT_OWNED, Errno::EPERM),
    (NtStatus::SEMAPHORE_LIMIT_EXCEEDED, Errno::EINVAL),
    (NtStatus::BUFFER_TOO_SMALL, Errno::EINVAL),
    (NtStatus::TIMEOUT, Errno::EAGAIN),
];

/// Translate a Win32 error. Codes outside the table become `EACCES`.
#[must_use]
pub fn win_to_errno(error: WinError) -> Errno {
    match WIN32_ERRNO_TABLE.iter().find(|(code, _, _)| *code == error) {
        Some((_, _, errno)) => *errno,
        None => {
            log::warn!("unmapped {error}, reporting EACCES");
            Errno::EACCES
        }
    }
}

/// Translate an NTSTATUS. `END_OF_FILE` is not an error and has no errno;
/// callers turn it into a zero-byte transfer before getting here.
#[must_use]
pub fn nt_to_errno(status: NtStatus) -> Errno {
    match NTSTATUS_ERRNO_TABLE.iter().find(|(code, _)| *code == status) {
        Some((_, errno)) => *errno,
        None => {
            log::warn!("unmapped {status}, reporting EACCES");
            Errno::EACCES
        }
    }
}

impl From<WinError> for Errno {
    fn from(error: WinError) -> Self {
        win_to_errno(error)
    }
}

impl From<NtStatus> for Errno {
    fn from(status: NtStatus) -> Self {
        nt_to_errno(status)
    }
}
