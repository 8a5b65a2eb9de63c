//! Pseudo-terminals.
//!
//! A pty is a pair of byte queues between one master side and any number of
//! slave opens. Each kernel object holds one [`PtyEnd`]; the side detaches
//! when the object goes away, so a side counts objects rather than handles.
//! The terminal state the layer above keeps for a pty is stored in its
//! attachment slot, which the kernel never looks into.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtySide {
    Master,
    Slave,
}

#[derive(Debug, Default)]
struct PtyQueues {
    /// Written by the master, read through the slave's line discipline.
    to_slave: VecDeque<u8>,
    /// Written by the slave (and echo), read by the master.
    to_master: VecDeque<u8>,
    masters: usize,
    slaves: usize,
    /// A slave was opened at some point.
    slave_seen: bool,
}

pub struct Pty {
    index: u32,
    queues: Mutex<PtyQueues>,
    cond: Condvar,
    attachment: OnceLock<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Pty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.queues.lock();
        f.debug_struct("Pty")
            .field("index", &self.index)
            .field("masters", &q.masters)
            .field("slaves", &q.slaves)
            .finish_non_exhaustive()
    }
}

impl Pty {
    #[must_use]
    pub fn new(index: u32) -> Arc<Self> {
        Arc::new(Self {
            index,
            queues: Mutex::new(PtyQueues::default()),
            cond: Condvar::new(),
            attachment: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn attach(self: &Arc<Self>, side: PtySide) -> PtyEnd {
        let mut q = self.queues.lock();
        match side {
            PtySide::Master => q.masters += 1,
            PtySide::Slave => {
                q.slaves += 1;
                q.slave_seen = true;
            }
        }
        self.cond.notify_all();
        PtyEnd {
            pty: Arc::clone(self),
            side,
        }
    }

    fn detach(&self, side: PtySide) {
        let mut q = self.queues.lock();
        match side {
            PtySide::Master => q.masters = q.masters.saturating_sub(1),
            PtySide::Slave => q.slaves = q.slaves.saturating_sub(1),
        }
        log::trace!(
            "pty {}: {side:?} detached (masters {}, slaves {})",
            self.index,
            q.masters,
            q.slaves
        );
        self.cond.notify_all();
    }

    /// The attachment, created by `init` on first use.
    pub fn attachment<F>(&self, init: F) -> Arc<dyn Any + Send + Sync>
    where
        F: FnOnce() -> Arc<dyn Any + Send + Sync>,
    {
        Arc::clone(self.attachment.get_or_init(init))
    }

    #[must_use]
    pub fn master_open(&self) -> bool {
        self.queues.lock().masters > 0
    }

    #[must_use]
    pub fn slaves(&self) -> usize {
        self.queues.lock().slaves
    }

    /// The master sees end of file: a slave was opened and none is left.
    #[must_use]
    pub fn slave_hung_up(&self) -> bool {
        let q = self.queues.lock();
        q.slave_seen && q.slaves == 0
    }

    /// Queue bytes towards `side`'s reader.
    pub fn push(&self, towards: PtySide, bytes: &[u8]) {
        let mut q = self.queues.lock();
        match towards {
            PtySide::Master => q.to_master.extend(bytes),
            PtySide::Slave => q.to_slave.extend(bytes),
        }
        self.cond.notify_all();
    }

    /// Take up to `buf.len()` bytes queued for `side`.
    pub fn pull(&self, side: PtySide, buf: &mut [u8]) -> usize {
        let mut q = self.queues.lock();
        let queue = match side {
            PtySide::Master => &mut q.to_master,
            PtySide::Slave => &mut q.to_slave,
        };
        let n = buf.len().min(queue.len());
        for (dst, src) in buf.iter_mut().zip(queue.drain(..n)) {
            *dst = src;
        }
        n
    }

    #[must_use]
    pub fn queued(&self, side: PtySide) -> usize {
        let q = self.queues.lock();
        match side {
            PtySide::Master => q.to_master.len(),
            PtySide::Slave => q.to_slave.len(),
        }
    }

    pub fn discard(&self, side: PtySide) {
        let mut q = self.queues.lock();
        match side {
            PtySide::Master => q.to_master.clear(),
            PtySide::Slave => q.to_slave.clear(),
        }
    }

    /// Park until something changes or `slice` elapses.
    pub fn wait(&self, slice: Duration) {
        let mut q = self.queues.lock();
        let _ = self.cond.wait_for(&mut q, slice);
    }
}

/// One side of a pty as held by a kernel object.
#[derive(Debug)]
pub struct PtyEnd {
    pty: Arc<Pty>,
    side: PtySide,
}

impl PtyEnd {
    #[must_use]
    pub fn pty(&self) -> &Arc<Pty> {
        &self.pty
    }

    #[must_use]
    pub fn side(&self) -> PtySide {
        self.side
    }
}

impl Drop for PtyEnd {
    fn drop(&mut self) {
        self.pty.detach(self.side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_run_in_both_directions() {
        let pty = Pty::new(0);
        let _m = pty.attach(PtySide::Master);
        let _s = pty.attach(PtySide::Slave);
        pty.push(PtySide::Slave, b"keys");
        pty.push(PtySide::Master, b"out");
        let mut buf = [0u8; 8];
        assert_eq!(pty.pull(PtySide::Slave, &mut buf), 4);
        assert_eq!(&buf[..4], b"keys");
        assert_eq!(pty.queued(PtySide::Master), 3);
        pty.discard(PtySide::Master);
        assert_eq!(pty.pull(PtySide::Master, &mut buf), 0);
    }

    #[test]
    fn hangup_needs_a_slave_to_have_existed() {
        let pty = Pty::new(3);
        let m = pty.attach(PtySide::Master);
        assert!(!pty.slave_hung_up());
        let s = pty.attach(PtySide::Slave);
        assert!(!pty.slave_hung_up());
        drop(s);
        assert!(pty.slave_hung_up());
        drop(m);
        assert!(!pty.master_open());
    }

    #[test]
    fn attachment_is_created_once() {
        let pty = Pty::new(0);
        let a = pty.attachment(|| Arc::new(7u32));
        let b = pty.attachment(|| Arc::new(9u32));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.downcast_ref::<u32>(), Some(&7));
    }
}
