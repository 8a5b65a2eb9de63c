//! Process signal state.
//!
//! Only the parts the descriptor layer touches: raising a signal marks it
//! pending unless it is ignored, and blocking calls poll
//! [`SignalState::interrupted`] between wait slices to abort with `EINTR`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::errno::Errno;

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGKILL: i32 = 9;
pub const SIGUSR1: i32 = 10;
pub const SIGPIPE: i32 = 13;
pub const SIGALRM: i32 = 14;
pub const SIGTERM: i32 = 15;
pub const SIGCHLD: i32 = 17;
pub const SIGCONT: i32 = 18;
pub const SIGSTOP: i32 = 19;
pub const SIGTSTP: i32 = 20;
pub const SIGWINCH: i32 = 28;

pub const NSIG: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Default,
    Ignore,
    Catch,
}

/// `how` argument of [`SignalState::set_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    SetMask,
}

fn bit(sig: i32) -> Result<u64, Errno> {
    if (1..=NSIG).contains(&sig) {
        Ok(1u64 << (sig - 1))
    } else {
        Err(Errno::EINVAL)
    }
}

#[derive(Debug)]
pub struct SignalState {
    pending: AtomicU64,
    blocked: AtomicU64,
    dispositions: Mutex<[Disposition; NSIG as usize]>,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            dispositions: Mutex::new([Disposition::Default; NSIG as usize]),
        }
    }

    /// Mark `sig` pending. Ignored signals are discarded.
    pub fn raise(&self, sig: i32) -> Result<(), Errno> {
        let mask = bit(sig)?;
        if self.disposition(sig)? == Disposition::Ignore {
            log::trace!("signal {sig} ignored");
            return Ok(());
        }
        self.pending.fetch_or(mask, Ordering::AcqRel);
        log::debug!("signal {sig} pending");
        Ok(())
    }

    pub fn disposition(&self, sig: i32) -> Result<Disposition, Errno> {
        bit(sig)?;
        Ok(self.dispositions.lock()[(sig - 1) as usize])
    }

    /// Install a disposition and return the previous one.
    pub fn set_disposition(&self, sig: i32, disposition: Disposition) -> Result<Disposition, Errno> {
        let mask = bit(sig)?;
        if sig == SIGKILL || sig == SIGSTOP {
            return Err(Errno::EINVAL);
        }
        let previous = std::mem::replace(
            &mut self.dispositions.lock()[(sig - 1) as usize],
            disposition,
        );
        if disposition == Disposition::Ignore {
            self.pending.fetch_and(!mask, Ordering::AcqRel);
        }
        Ok(previous)
    }

    pub fn set_mask(&self, how: MaskHow, set: u64) -> u64 {
        let unblockable = bit(SIGKILL).unwrap_or(0) | bit(SIGSTOP).unwrap_or(0);
        let set = set & !unblockable;
        match how {
            MaskHow::Block => self.blocked.fetch_or(set, Ordering::AcqRel),
            MaskHow::Unblock => self.blocked.fetch_and(!set, Ordering::AcqRel),
            MaskHow::SetMask => self.blocked.swap(set, Ordering::AcqRel),
        }
    }

    #[must_use]
    pub fn mask(&self) -> u64 {
        self.blocked.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_pending(&self, sig: i32) -> bool {
        bit(sig).is_ok_and(|m| self.pending.load(Ordering::Acquire) & m != 0)
    }

    /// An unblocked signal is pending: blocking calls must give up.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.pending.load(Ordering::Acquire) & !self.blocked.load(Ordering::Acquire) != 0
    }

    /// Take every unblocked pending signal, lowest number first.
    pub fn deliver_pending(&self) -> Vec<i32> {
        let blocked = self.blocked.load(Ordering::Acquire);
        let taken = self.pending.fetch_and(blocked, Ordering::AcqRel) & !blocked;
        (1..=NSIG).filter(|s| taken & (1u64 << (s - 1)) != 0).collect()
    }

    /// State inherited by a forked child: dispositions and mask, nothing pending.
    #[must_use]
    pub fn fork_copy(&self) -> Self {
        Self {
            pending: AtomicU64::new(0),
            blocked: AtomicU64::new(self.mask()),
            dispositions: Mutex::new(*self.dispositions.lock()),
        }
    }
}
