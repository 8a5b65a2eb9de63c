//! Window message queue of the calling thread.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::status::WinError;

/// `MSG`, minus the time and point fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowMessage {
    pub hwnd: u64,
    pub message: u32,
    pub wparam: u64,
    pub lparam: u64,
}

/// A thread message queue plus the windows that receive through it.
///
/// Window handle 0 addresses the thread itself. Sent messages are
/// dispatched synchronously and recorded in a log; their result is the
/// message's `lparam`, which is enough for callers to check the round trip.
#[derive(Debug)]
pub struct MessageQueue {
    queue: Mutex<VecDeque<WindowMessage>>,
    cond: Condvar,
    windows: Mutex<HashSet<u64>>,
    next_hwnd: AtomicU64,
    dispatched: Mutex<Vec<WindowMessage>>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            windows: Mutex::new(HashSet::new()),
            next_hwnd: AtomicU64::new(0x10010),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    pub fn create_window(&self) -> u64 {
        let hwnd = self.next_hwnd.fetch_add(0x10, Ordering::AcqRel);
        self.windows.lock().insert(hwnd);
        hwnd
    }

    pub fn destroy_window(&self, hwnd: u64) -> Result<(), WinError> {
        if self.windows.lock().remove(&hwnd) {
            Ok(())
        } else {
            Err(WinError::INVALID_WINDOW_HANDLE)
        }
    }

    fn check_target(&self, hwnd: u64) -> Result<(), WinError> {
        if hwnd == 0 || self.windows.lock().contains(&hwnd) {
            Ok(())
        } else {
            Err(WinError::INVALID_WINDOW_HANDLE)
        }
    }

    /// `PostMessage`: queue and return immediately.
    pub fn post(&self, msg: WindowMessage) -> Result<(), WinError> {
        self.check_target(msg.hwnd)?;
        self.queue.lock().push_back(msg);
        self.cond.notify_all();
        Ok(())
    }

    /// `SendMessage`: dispatch now.
    pub fn send(&self, msg: WindowMessage) -> Result<u64, WinError> {
        self.check_target(msg.hwnd)?;
        self.dispatched.lock().push(msg);
        Ok(msg.lparam)
    }

    /// `PeekMessage` with an optional window filter.
    pub fn peek(&self, hwnd: Option<u64>, remove: bool) -> Option<WindowMessage> {
        let mut queue = self.queue.lock();
        let pos = queue
            .iter()
            .position(|m| hwnd.is_none_or(|h| m.hwnd == h))?;
        if remove {
            queue.remove(pos)
        } else {
            queue.get(pos).copied()
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Messages handed to `send` so far.
    #[must_use]
    pub fn dispatched(&self) -> Vec<WindowMessage> {
        self.dispatched.lock().clone()
    }

    /// Park until a message is posted or `slice` elapses.
    pub fn wait_change(&self, slice: Duration) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            let _ = self.cond.wait_for(&mut queue, slice);
        }
    }
}
