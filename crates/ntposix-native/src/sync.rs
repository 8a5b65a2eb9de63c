//! Waitable synchronization objects: mutexes, semaphores and events.
//!
//! Waits are sliced. [`wait_for`] retries the object's non-blocking acquire,
//! parks for at most one slice, and consults an interrupt predicate between
//! slices, so a pending signal or an expired deadline is noticed within one
//! slice even when nothing wakes the waiter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::status::NtStatus;

/// Outcome of a sliced wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The object was acquired (mutex owned, semaphore count taken, event consumed).
    Acquired,
    /// The deadline passed first.
    TimedOut,
    /// The interrupt predicate fired first.
    Interrupted,
}

/// An object a thread can block on.
pub trait Waitable: Send + Sync {
    /// Take the object if it is signaled, without blocking.
    fn try_acquire(&self) -> bool;

    /// Park until the object's state may have changed, or `slice` elapses.
    fn wait_change(&self, slice: Duration);
}

/// Wait for `object`, giving up at `timeout` (`None` waits forever) or as
/// soon as `interrupted` returns true.
pub fn wait_for(
    object: &dyn Waitable,
    timeout: Option<Duration>,
    slice: Duration,
    interrupted: &dyn Fn() -> bool,
) -> WaitStatus {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if object.try_acquire() {
            return WaitStatus::Acquired;
        }
        if interrupted() {
            return WaitStatus::Interrupted;
        }
        let step = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitStatus::TimedOut;
                }
                slice.min(deadline - now)
            }
            None => slice,
        };
        object.wait_change(step);
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MutexState {
    owner: Option<ThreadId>,
    recursion: u32,
}

/// A recursive, thread-owned mutex.
#[derive(Debug, Default)]
pub struct MutexObject {
    state: Mutex<MutexState>,
    cond: Condvar,
}

impl MutexObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Release one level of ownership held by the calling thread.
    pub fn release(&self) -> Result<(), NtStatus> {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return Err(NtStatus::MUTANT_NOT_OWNED);
        }
        state.recursion -= 1;
        if state.recursion == 0 {
            state.owner = None;
            self.cond.notify_all();
        }
        Ok(())
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

impl Waitable for MutexObject {
    fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.recursion = 1;
                true
            }
            Some(owner) if owner == me => {
                state.recursion += 1;
                true
            }
            Some(_) => false,
        }
    }

    fn wait_change(&self, slice: Duration) {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            let _ = self.cond.wait_for(&mut state, slice);
        }
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// A counting semaphore that tracks how many threads are parked on it.
#[derive(Debug)]
pub struct SemaphoreObject {
    count: Mutex<u32>,
    maximum: u32,
    waiters: AtomicUsize,
    cond: Condvar,
}

impl SemaphoreObject {
    #[must_use]
    pub fn new(initial: u32, maximum: u32) -> Self {
        Self {
            count: Mutex::new(initial.min(maximum)),
            maximum,
            waiters: AtomicUsize::new(0),
            cond: Condvar::new(),
        }
    }

    /// Add `n` to the count. Returns the previous count.
    pub fn release(&self, n: u32) -> Result<u32, NtStatus> {
        let mut count = self.count.lock();
        let previous = *count;
        let next = previous
            .checked_add(n)
            .filter(|next| *next <= self.maximum)
            .ok_or(NtStatus::SEMAPHORE_LIMIT_EXCEEDED)?;
        *count = next;
        self.cond.notify_all();
        Ok(previous)
    }

    /// Release one count for every parked waiter not already covered by
    /// the current count. Returns how many counts were added.
    pub fn release_waiters(&self) -> u32 {
        let mut count = self.count.lock();
        let waiting = u32::try_from(self.waiters.load(Ordering::Acquire)).unwrap_or(u32::MAX);
        let add = waiting.saturating_sub(*count).min(self.maximum - *count);
        if add > 0 {
            *count += add;
            self.cond.notify_all();
        }
        add
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

impl Waitable for SemaphoreObject {
    fn try_acquire(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    fn wait_change(&self, slice: Duration) {
        let mut count = self.count.lock();
        if *count == 0 {
            self.waiters.fetch_add(1, Ordering::AcqRel);
            let _ = self.cond.wait_for(&mut count, slice);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A manual- or auto-reset event.
#[derive(Debug)]
pub struct EventObject {
    manual_reset: bool,
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl EventObject {
    #[must_use]
    pub fn new(manual_reset: bool, initial: bool) -> Self {
        Self {
            manual_reset,
            signaled: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }
}

impl Waitable for EventObject {
    fn try_acquire(&self) -> bool {
        let mut signaled = self.signaled.lock();
        if *signaled {
            if !self.manual_reset {
                *signaled = false;
            }
            true
        } else {
            false
        }
    }

    fn wait_change(&self, slice: Duration) {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self.cond.wait_for(&mut signaled, slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    const SLICE: Duration = Duration::from_millis(5);

    fn never() -> bool {
        false
    }

    #[test]
    fn mutex_is_recursive_for_owner() {
        let m = MutexObject::new();
        assert!(m.try_acquire());
        assert!(m.try_acquire());
        m.release().unwrap();
        assert!(m.is_owned());
        m.release().unwrap();
        assert!(!m.is_owned());
        assert_eq!(m.release(), Err(NtStatus::MUTANT_NOT_OWNED));
    }

    #[test]
    fn mutex_blocks_other_thread_until_release() {
        let m = Arc::new(MutexObject::new());
        assert!(m.try_acquire());
        let m2 = Arc::clone(&m);
        let t = thread::spawn(move || {
            let status = wait_for(&*m2, Some(Duration::from_secs(5)), SLICE, &never);
            m2.release().unwrap();
            status
        });
        thread::sleep(Duration::from_millis(20));
        m.release().unwrap();
        assert_eq!(t.join().unwrap(), WaitStatus::Acquired);
    }

    #[test]
    fn semaphore_counts_and_limits() {
        let s = SemaphoreObject::new(0, 2);
        assert!(!s.try_acquire());
        assert_eq!(s.release(2), Ok(0));
        assert_eq!(s.release(1), Err(NtStatus::SEMAPHORE_LIMIT_EXCEEDED));
        assert!(s.try_acquire());
        assert!(s.try_acquire());
        assert!(!s.try_acquire());
    }

    #[test]
    fn release_waiters_without_waiters_is_noop() {
        let s = SemaphoreObject::new(0, 100);
        assert_eq!(s.release_waiters(), 0);
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn auto_reset_event_is_consumed() {
        let e = EventObject::new(false, true);
        assert!(e.try_acquire());
        assert!(!e.try_acquire());
        let manual = EventObject::new(true, true);
        assert!(manual.try_acquire());
        assert!(manual.try_acquire());
        manual.reset();
        assert!(!manual.is_set());
    }

    #[test]
    fn wait_times_out() {
        let e = EventObject::new(true, false);
        let status = wait_for(&e, Some(Duration::from_millis(15)), SLICE, &never);
        assert_eq!(status, WaitStatus::TimedOut);
    }

    #[test]
    fn wait_is_interruptible() {
        let e = Arc::new(EventObject::new(true, false));
        let flag = Arc::new(AtomicBool::new(false));
        let f2 = Arc::clone(&flag);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            f2.store(true, Ordering::SeqCst);
        });
        let status = wait_for(&*e, None, SLICE, &|| flag.load(Ordering::SeqCst));
        t.join().unwrap();
        assert_eq!(status, WaitStatus::Interrupted);
    }
}
