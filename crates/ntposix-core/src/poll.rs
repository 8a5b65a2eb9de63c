//! `poll` and `select` over handle readiness.
//!
//! Each handle answers a readiness query and names what a waiter should
//! park on. A call loops: query every descriptor, return if anything is
//! ready, otherwise park on the first descriptor's wait source for one
//! slice and re-check. Signals end the wait with `EINTR`.

use std::time::{Duration, Instant};

use crate::dtable::DescriptorTable;
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::WaitSource;

// ---------------------------------------------------------------------------
// poll event flags
// ---------------------------------------------------------------------------

pub const POLLIN: i16 = 0x001;
pub const POLLPRI: i16 = 0x002;
pub const POLLOUT: i16 = 0x004;
pub const POLLERR: i16 = 0x008;
pub const POLLHUP: i16 = 0x010;
pub const POLLNVAL: i16 = 0x020;
pub const POLLRDNORM: i16 = 0x040;
pub const POLLWRNORM: i16 = 0x100;

/// Bits a caller may request.
const POLL_INPUT_MASK: i16 = POLLIN | POLLOUT | POLLPRI | POLLRDNORM | POLLWRNORM;

/// Maximum number of descriptors in an `fd_set`.
pub const FD_SETSIZE: usize = 1024;

/// Returns true if `events` contains only requestable bits.
#[must_use]
pub const fn valid_poll_events(events: i16) -> bool {
    (events & !POLL_INPUT_MASK) == 0
}

/// -1 waits forever; anything else must be non-negative.
#[must_use]
pub const fn valid_poll_timeout(timeout_ms: i32) -> bool {
    timeout_ms >= -1
}

/// `struct pollfd`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollFd {
    pub fd: i32,
    pub events: i16,
    pub revents: i16,
}

impl PollFd {
    #[must_use]
    pub const fn new(fd: i32, events: i16) -> Self {
        Self {
            fd,
            events,
            revents: 0,
        }
    }
}

/// One scan. Returns the number of entries with events and the wait
/// source of the first live descriptor.
fn scan(table: &DescriptorTable, fds: &mut [PollFd]) -> (usize, Option<WaitSource>) {
    let mut ready = 0;
    let mut source = None;
    for pfd in fds.iter_mut() {
        pfd.revents = 0;
        if pfd.fd < 0 {
            continue;
        }
        let Ok(fh) = table.get(pfd.fd) else {
            pfd.revents = POLLNVAL;
            ready += 1;
            continue;
        };
        let r = fh.readiness();
        if r.readable {
            pfd.revents |= pfd.events & (POLLIN | POLLRDNORM);
        }
        if r.writable {
            pfd.revents |= pfd.events & (POLLOUT | POLLWRNORM);
        }
        // Reported whether requested or not.
        if r.hangup {
            pfd.revents |= POLLHUP;
        }
        if r.error {
            pfd.revents |= POLLERR;
        }
        if pfd.revents != 0 {
            ready += 1;
        } else if source.is_none() {
            source = Some(fh.wait_source());
        }
    }
    (ready, source)
}

/// `poll(fds, timeout)`. `None` waits forever.
pub fn poll(
    env: &Env,
    table: &DescriptorTable,
    fds: &mut [PollFd],
    timeout: Option<Duration>,
) -> Result<usize, Errno> {
    if fds.len() > table.open_max() {
        return Err(Errno::EINVAL);
    }
    if let Some(bad) = fds.iter().find(|p| !valid_poll_events(p.events)) {
        log::debug!("poll: fd {} requests unknown events {:#x}", bad.fd, bad.events);
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    let slice = env.wait_slice();
    loop {
        let (ready, source) = scan(table, fds);
        if ready > 0 {
            log::trace!("poll: {ready} ready");
            return Ok(ready);
        }
        let remaining = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Ok(0);
                }
                d - now
            }
            None => slice,
        };
        if env.interrupted() {
            return Err(Errno::EINTR);
        }
        source
            .unwrap_or(WaitSource::Poll)
            .park(remaining.min(slice));
    }
}

// ---------------------------------------------------------------------------
// select
// ---------------------------------------------------------------------------

/// `fd_set`.
#[derive(Clone, PartialEq, Eq)]
pub struct FdSet {
    bits: [u64; FD_SETSIZE / 64],
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FdSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: [0; FD_SETSIZE / 64],
        }
    }

    fn slot(fd: i32) -> Option<(usize, u64)> {
        let fd = usize::try_from(fd).ok().filter(|fd| *fd < FD_SETSIZE)?;
        Some((fd / 64, 1u64 << (fd % 64)))
    }

    pub fn set(&mut self, fd: i32) {
        if let Some((word, bit)) = Self::slot(fd) {
            self.bits[word] |= bit;
        }
    }

    pub fn clear(&mut self, fd: i32) {
        if let Some((word, bit)) = Self::slot(fd) {
            self.bits[word] &= !bit;
        }
    }

    #[must_use]
    pub fn is_set(&self, fd: i32) -> bool {
        Self::slot(fd).is_some_and(|(word, bit)| self.bits[word] & bit != 0)
    }

    pub fn zero(&mut self) {
        self.bits = [0; FD_SETSIZE / 64];
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        (0..FD_SETSIZE)
            .filter(|fd| self.bits[fd / 64] & (1u64 << (fd % 64)) != 0)
            .filter_map(|fd| i32::try_from(fd).ok())
    }
}

/// `select(nfds, read, write, except, timeout)`, built on [`poll`]. Sets
/// are rewritten to the ready subset; the result counts set bits.
pub fn select(
    env: &Env,
    table: &DescriptorTable,
    nfds: i32,
    mut read: Option<&mut FdSet>,
    mut write: Option<&mut FdSet>,
    mut except: Option<&mut FdSet>,
    timeout: Option<Duration>,
) -> Result<usize, Errno> {
    let nfds = usize::try_from(nfds)
        .ok()
        .filter(|n| *n <= FD_SETSIZE)
        .ok_or(Errno::EINVAL)?;
    let wanted = |set: &Option<&mut FdSet>, fd: i32| set.as_ref().is_some_and(|s| s.is_set(fd));
    let mut pfds = Vec::new();
    for fd in (0..nfds).filter_map(|fd| i32::try_from(fd).ok()) {
        let mut events = 0;
        if wanted(&read, fd) {
            events |= POLLIN;
        }
        if wanted(&write, fd) {
            events |= POLLOUT;
        }
        if events != 0 || wanted(&except, fd) {
            if !table.is_open(fd) {
                return Err(Errno::EBADF);
            }
            pfds.push(PollFd::new(fd, events));
        }
    }
    poll(env, table, &mut pfds, timeout)?;

    let mut count = 0;
    for set in [read.as_deref_mut(), write.as_deref_mut(), except.as_deref_mut()]
        .into_iter()
        .flatten()
    {
        set.zero();
    }
    for p in &pfds {
        let hit = |set: &mut Option<&mut FdSet>, on: bool, count: &mut usize| {
            if let Some(set) = set.as_deref_mut() {
                if on {
                    set.set(p.fd);
                    *count += 1;
                }
            }
        };
        hit(
            &mut read,
            p.events & POLLIN != 0 && p.revents & (POLLIN | POLLHUP | POLLERR) != 0,
            &mut count,
        );
        hit(
            &mut write,
            p.events & POLLOUT != 0 && p.revents & (POLLOUT | POLLERR) != 0,
            &mut count,
        );
        hit(&mut except, p.revents & POLLERR != 0, &mut count);
    }
    Ok(count)
}
