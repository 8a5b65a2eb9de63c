//! Shared pieces of the raw device variants: the block buffer and the
//! bounded retry loop around driver primitives.

use std::fmt;

use ntposix_native::{Partial, WinError};

use crate::errno::Errno;

// ---------------------------------------------------------------------------
// Block buffer
// ---------------------------------------------------------------------------

/// Read-ahead / write-behind buffer of one device block.
///
/// Reads fill `devbuf[..end]` from the device and hand out `start..end`;
/// writes accumulate in `devbuf[..end]` until a whole block is ready.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    devbuf: Vec<u8>,
    start: usize,
    end: usize,
    bufsize: usize,
    pub is_writing: bool,
    pub has_written: bool,
    pub eom_detected: bool,
    pub eof_detected: bool,
    pub lastblk_to_read: bool,
    pub varblk: bool,
}

impl RawBuffer {
    #[must_use]
    pub fn new(bufsize: usize, varblk: bool) -> Self {
        let bufsize = bufsize.max(1);
        Self {
            devbuf: vec![0; bufsize],
            start: 0,
            end: 0,
            bufsize,
            is_writing: false,
            has_written: false,
            eom_detected: false,
            eof_detected: false,
            lastblk_to_read: false,
            varblk,
        }
    }

    #[must_use]
    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Bytes held: unread data while reading, unflushed data while writing.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Drop buffered data and the end-condition flags.
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.is_writing = false;
        self.eom_detected = false;
        self.eof_detected = false;
        self.lastblk_to_read = false;
    }

    /// Copy buffered read data into `out`.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        if self.is_writing {
            return 0;
        }
        let n = self.buffered().min(out.len());
        out[..n].copy_from_slice(&self.devbuf[self.start..self.start + n]);
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        n
    }

    /// Discard up to `n` buffered read bytes.
    pub fn skip(&mut self, n: usize) {
        self.start += n.min(self.buffered());
    }

    /// The whole buffer, for a device read of one block.
    pub fn fill_space(&mut self) -> &mut [u8] {
        self.start = 0;
        self.end = 0;
        &mut self.devbuf[..self.bufsize]
    }

    /// Record how much of [`RawBuffer::fill_space`] the device filled.
    pub fn set_filled(&mut self, n: usize) {
        self.start = 0;
        self.end = n.min(self.bufsize);
        self.is_writing = false;
    }

    /// Accumulate write data; returns how much fit.
    pub fn append(&mut self, data: &[u8]) -> usize {
        self.is_writing = true;
        let n = (self.bufsize - self.end).min(data.len());
        self.devbuf[self.end..self.end + n].copy_from_slice(&data[..n]);
        self.end += n;
        n
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.end == self.bufsize
    }

    /// Pending write data padded with zeroes to a whole block.
    #[must_use]
    pub fn padded_block(&self) -> Vec<u8> {
        let mut block = self.devbuf[self.start..self.end].to_vec();
        block.resize(self.bufsize, 0);
        block
    }

    /// Forget pending write data after it reached the device.
    pub fn written(&mut self) {
        self.start = 0;
        self.end = 0;
        self.has_written = true;
    }

    /// Resize the buffer; it may not shrink below what is buffered.
    pub fn set_size(&mut self, bufsize: usize) -> Result<(), Errno> {
        if bufsize == 0 || bufsize < self.buffered() {
            return Err(Errno::EINVAL);
        }
        let held = self.devbuf[self.start..self.end].to_vec();
        self.devbuf = vec![0; bufsize];
        self.devbuf[..held.len()].copy_from_slice(&held);
        self.start = 0;
        self.end = held.len();
        self.bufsize = bufsize;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bounded retry
// ---------------------------------------------------------------------------

/// Errors that may go away when the same primitive is reissued.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for WinError {
    fn is_transient(&self) -> bool {
        WinError::is_transient(*self)
    }
}

impl Retryable for Partial {
    /// Only a failure that moved nothing can be reissued safely.
    fn is_transient(&self) -> bool {
        self.transferred == 0 && self.error.is_transient()
    }
}

/// Run `op` up to `limit` times while it fails transiently. The last error
/// is returned once the attempts are used up.
pub fn retry<T, E>(limit: u32, what: &str, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E>
where
    E: Retryable + fmt::Display,
{
    let limit = limit.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() => {
                if attempt >= limit {
                    log::warn!("{what}: {e} persisted over {limit} attempts");
                    return Err(e);
                }
                log::debug!("{what}: {e}, reissuing (attempt {attempt}/{limit})");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_then_rewinds_cursors() {
        let mut buf = RawBuffer::new(8, false);
        buf.fill_space()[..5].copy_from_slice(b"hello");
        buf.set_filled(5);
        let mut out = [0u8; 3];
        assert_eq!(buf.take(&mut out), 3);
        assert_eq!(&out, b"hel");
        assert_eq!(buf.buffered(), 2);
        assert_eq!(buf.take(&mut out), 2);
        assert_eq!(&out[..2], b"lo");
        assert_eq!(buf.buffered(), 0);
    }

    #[test]
    fn write_accumulates_and_pads() {
        let mut buf = RawBuffer::new(4, false);
        assert_eq!(buf.append(b"abcdef"), 4);
        assert!(buf.is_full());
        buf.written();
        assert_eq!(buf.append(b"xy"), 2);
        assert_eq!(buf.padded_block(), b"xy\0\0".to_vec());
        // Pending writes are not readable.
        let mut out = [0u8; 4];
        assert_eq!(buf.take(&mut out), 0);
    }

    #[test]
    fn set_size_keeps_buffered_bytes() {
        let mut buf = RawBuffer::new(8, false);
        buf.append(b"abc");
        assert_eq!(buf.set_size(2), Err(Errno::EINVAL));
        buf.set_size(16).unwrap();
        assert_eq!(buf.bufsize(), 16);
        assert_eq!(buf.buffered(), 3);
        assert_eq!(buf.set_size(0), Err(Errno::EINVAL));
    }

    #[test]
    fn reset_clears_flags() {
        let mut buf = RawBuffer::new(4, true);
        buf.eom_detected = true;
        buf.eof_detected = true;
        buf.append(b"a");
        buf.reset();
        assert!(!buf.eom_detected && !buf.eof_detected && !buf.is_writing);
        assert_eq!(buf.buffered(), 0);
        assert!(buf.varblk);
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    #[test]
    fn transient_failures_under_the_bound_are_absorbed() {
        let mut calls = 0;
        let result: Result<u32, WinError> = retry(5, "test", || {
            calls += 1;
            if calls < 5 {
                Err(WinError::MEDIA_CHANGED)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 5);
    }

    #[test]
    fn exhaustion_returns_the_last_error() {
        let mut calls = 0;
        let result: Result<(), WinError> = retry(3, "test", || {
            calls += 1;
            Err(WinError::BUS_RESET)
        });
        assert_eq!(result, Err(WinError::BUS_RESET));
        assert_eq!(calls, 3);
        assert_eq!(Errno::from(WinError::BUS_RESET), Errno::EIO);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), WinError> = retry(5, "test", || {
            calls += 1;
            Err(WinError::WRITE_PROTECT)
        });
        assert_eq!(result, Err(WinError::WRITE_PROTECT));
        assert_eq!(calls, 1);
    }

    #[test]
    fn partial_progress_is_never_reissued() {
        assert!(Partial::none(WinError::MEDIA_CHANGED).is_transient());
        assert!(!Partial::new(10, WinError::MEDIA_CHANGED).is_transient());
        assert!(!Partial::none(WinError::END_OF_MEDIA).is_transient());
    }
}
