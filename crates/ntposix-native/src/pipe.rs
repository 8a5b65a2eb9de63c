//! Named pipes.
//!
//! A pipe is one shared byte queue with a fixed quota and attached read and
//! write ends. The primitive calls never block: `read` on an empty pipe
//! reports `PIPE_EMPTY`, and `write` moves only what fits in the remaining
//! quota (possibly nothing). Blocking behaviour is layered on top by the
//! caller using [`PipeEnd::query_local`] and [`PipeEnd::wait_change`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::status::NtStatus;

/// Which end of a pipe an object refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeSide {
    Read,
    Write,
}

/// Connection state as seen from one end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedPipeState {
    /// No peer has attached yet.
    Listening,
    /// Both ends are attached.
    Connected,
    /// The peer has gone away after having been attached.
    Closing,
}

/// Snapshot returned by [`PipeEnd::query_local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeLocalInfo {
    pub read_data_available: usize,
    pub write_quota_available: usize,
    pub capacity: usize,
    pub state: NamedPipeState,
}

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    readers: usize,
    writers: usize,
    ever_read: bool,
    ever_written: bool,
}

/// The shared body of a pipe.
#[derive(Debug)]
pub struct PipeShared {
    id: u64,
    name: String,
    capacity: usize,
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl PipeShared {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            capacity,
            state: Mutex::new(PipeState::default()),
            cond: Condvar::new(),
        })
    }

    /// Create a pipe with both ends attached.
    #[must_use]
    pub fn create_pair(id: u64, name: impl Into<String>, capacity: usize) -> (PipeEnd, PipeEnd) {
        let shared = Self::new(id, name, capacity);
        let read = shared.attach(PipeSide::Read);
        let write = shared.attach(PipeSide::Write);
        (read, write)
    }

    /// Attach a new end.
    #[must_use]
    pub fn attach(self: &Arc<Self>, side: PipeSide) -> PipeEnd {
        let mut state = self.state.lock();
        match side {
            PipeSide::Read => {
                state.readers += 1;
                state.ever_read = true;
            }
            PipeSide::Write => {
                state.writers += 1;
                state.ever_written = true;
            }
        }
        self.cond.notify_all();
        PipeEnd {
            shared: Arc::clone(self),
            side,
        }
    }

    fn detach(&self, side: PipeSide) {
        let mut state = self.state.lock();
        match side {
            PipeSide::Read => state.readers = state.readers.saturating_sub(1),
            PipeSide::Write => state.writers = state.writers.saturating_sub(1),
        }
        if state.readers == 0 && state.writers == 0 {
            state.buf.clear();
            state.ever_read = false;
            state.ever_written = false;
        }
        log::trace!(
            "pipe {}: {:?} end detached (readers {}, writers {})",
            self.name,
            side,
            state.readers,
            state.writers
        );
        self.cond.notify_all();
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    #[must_use]
    pub fn writers(&self) -> usize {
        self.state.lock().writers
    }

    /// Park until something about the pipe changes or `slice` elapses.
    pub fn wait_change(&self, slice: Duration) {
        let mut state = self.state.lock();
        let _ = self.cond.wait_for(&mut state, slice);
    }
}

/// One attached end of a pipe. Dropping the end detaches it; a kernel
/// object wrapping it drops it when its last handle is closed.
#[derive(Debug)]
pub struct PipeEnd {
    shared: Arc<PipeShared>,
    side: PipeSide,
}

impl PipeEnd {
    #[must_use]
    pub fn side(&self) -> PipeSide {
        self.side
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<PipeShared> {
        &self.shared
    }

    /// The equivalent of `FilePipeLocalInformation`.
    #[must_use]
    pub fn query_local(&self) -> PipeLocalInfo {
        let state = self.shared.state.lock();
        let (peers, ever) = match self.side {
            PipeSide::Read => (state.writers, state.ever_written),
            PipeSide::Write => (state.readers, state.ever_read),
        };
        let pipe_state = if peers > 0 {
            NamedPipeState::Connected
        } else if ever {
            NamedPipeState::Closing
        } else {
            NamedPipeState::Listening
        };
        PipeLocalInfo {
            read_data_available: state.buf.len(),
            write_quota_available: self.shared.capacity - state.buf.len(),
            capacity: self.shared.capacity,
            state: pipe_state,
        }
    }

    /// Move queued bytes into `buf`.
    ///
    /// `PIPE_EMPTY` when nothing is queued and a writer may still appear;
    /// `PIPE_BROKEN` when nothing is queued and no writer is attached.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, NtStatus> {
        if self.side != PipeSide::Read {
            return Err(NtStatus::ACCESS_DENIED);
        }
        let mut state = self.shared.state.lock();
        if state.buf.is_empty() {
            return if state.writers == 0 {
                Err(NtStatus::PIPE_BROKEN)
            } else {
                Err(NtStatus::PIPE_EMPTY)
            };
        }
        let n = buf.len().min(state.buf.len());
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *dst = src;
        }
        self.shared.cond.notify_all();
        Ok(n)
    }

    /// Queue as much of `buf` as the remaining quota allows.
    ///
    /// `PIPE_CLOSING` when no reader is attached.
    pub fn write(&self, buf: &[u8]) -> Result<usize, NtStatus> {
        if self.side != PipeSide::Write {
            return Err(NtStatus::ACCESS_DENIED);
        }
        let mut state = self.shared.state.lock();
        if state.readers == 0 {
            return Err(NtStatus::PIPE_CLOSING);
        }
        let room = self.shared.capacity - state.buf.len();
        let n = buf.len().min(room);
        state.buf.extend(&buf[..n]);
        if n > 0 {
            self.shared.cond.notify_all();
        }
        Ok(n)
    }

    /// Park until something about the pipe changes or `slice` elapses.
    pub fn wait_change(&self, slice: Duration) {
        self.shared.wait_change(slice);
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.shared.detach(self.side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_round_trips_bytes() {
        let (r, w) = PipeShared::create_pair(1, "t", 16);
        assert_eq!(w.write(b"hello"), Ok(5));
        let info = r.query_local();
        assert_eq!(info.read_data_available, 5);
        assert_eq!(info.write_quota_available, 11);
        assert_eq!(info.state, NamedPipeState::Connected);
        let mut buf = [0u8; 10];
        assert_eq!(r.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(r.read(&mut buf), Err(NtStatus::PIPE_EMPTY));
    }

    #[test]
    fn write_is_limited_by_quota() {
        let (_r, w) = PipeShared::create_pair(1, "t", 4);
        assert_eq!(w.write(b"abcdef"), Ok(4));
        assert_eq!(w.write(b"x"), Ok(0));
    }

    #[test]
    fn closing_writer_gives_broken_after_drain() {
        let (r, w) = PipeShared::create_pair(1, "t", 16);
        w.write(b"ab").unwrap();
        drop(w);
        assert_eq!(r.query_local().state, NamedPipeState::Closing);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Ok(2));
        assert_eq!(r.read(&mut buf), Err(NtStatus::PIPE_BROKEN));
    }

    #[test]
    fn closing_reader_refuses_writes() {
        let (r, w) = PipeShared::create_pair(1, "t", 16);
        drop(r);
        assert_eq!(w.write(b"x"), Err(NtStatus::PIPE_CLOSING));
    }

    #[test]
    fn wrong_side_is_denied() {
        let (r, w) = PipeShared::create_pair(1, "t", 16);
        assert_eq!(r.write(b"x"), Err(NtStatus::ACCESS_DENIED));
        let mut buf = [0u8; 1];
        assert_eq!(w.read(&mut buf), Err(NtStatus::ACCESS_DENIED));
    }

    #[test]
    fn fifo_reports_listening_before_peer() {
        let shared = PipeShared::new(7, "fifo", 16);
        let r = shared.attach(PipeSide::Read);
        assert_eq!(r.query_local().state, NamedPipeState::Listening);
        let _w = shared.attach(PipeSide::Write);
        assert_eq!(r.query_local().state, NamedPipeState::Connected);
    }
}
