//! The descriptor table: small integers to open file descriptions.
//!
//! Slots hold `Arc` references. A non-archetype description is referenced
//! by exactly one slot, so `dup` clones it with duplicated native handles;
//! the console archetype is referenced by every slot that aliases it and
//! counts them in its base. [`DescriptorTable::close`] calls
//! [`Fhandler::close`] only when the last reference goes.
//!
//! The table lock is never held across a call into a handle.

use std::sync::Arc;

use ntposix_native::Process;
use parking_lot::RwLock;

use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::Fhandler;

#[derive(Clone)]
struct Slot {
    fh: Arc<dyn Fhandler>,
    cloexec: bool,
}

pub struct DescriptorTable {
    slots: RwLock<Vec<Option<Slot>>>,
    open_max: usize,
}

impl std::fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("open", &self.open_fds())
            .field("open_max", &self.open_max)
            .finish()
    }
}

fn index(fd: i32) -> Result<usize, Errno> {
    usize::try_from(fd).map_err(|_| Errno::EBADF)
}

/// Drop one slot reference; close the description when it was the last.
pub(crate) fn release(fh: &Arc<dyn Fhandler>) -> Result<(), Errno> {
    if fh.base().release() {
        log::trace!("{}: closing", fh.base().name());
        if fh.is_archetype() {
            fh.base().env().unregister_archetype(fh.base().dev(), fh);
        }
        fh.close()
    } else {
        Ok(())
    }
}

impl DescriptorTable {
    #[must_use]
    pub fn new(open_max: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            open_max: open_max.max(1),
        }
    }

    #[must_use]
    pub fn open_max(&self) -> usize {
        self.open_max
    }

    /// Put `fh` into the lowest free slot at or above `min`.
    pub fn install_from(
        &self,
        min: usize,
        fh: Arc<dyn Fhandler>,
        cloexec: bool,
    ) -> Result<i32, Errno> {
        let mut slots = self.slots.write();
        let free = (min..self.open_max).find(|&i| slots.get(i).is_none_or(Option::is_none));
        let Some(i) = free else {
            drop(slots);
            log::debug!("descriptor table full ({} slots)", self.open_max);
            let _ = release(&fh);
            return Err(Errno::EMFILE);
        };
        if slots.len() <= i {
            slots.resize(i + 1, None);
        }
        slots[i] = Some(Slot { fh, cloexec });
        i32::try_from(i).map_err(|_| Errno::EMFILE)
    }

    /// Put `fh` into the lowest free slot.
    pub fn install(&self, fh: Arc<dyn Fhandler>, cloexec: bool) -> Result<i32, Errno> {
        self.install_from(0, fh, cloexec)
    }

    pub fn get(&self, fd: i32) -> Result<Arc<dyn Fhandler>, Errno> {
        let i = index(fd)?;
        self.slots
            .read()
            .get(i)
            .and_then(Option::as_ref)
            .map(|s| Arc::clone(&s.fh))
            .ok_or(Errno::EBADF)
    }

    #[must_use]
    pub fn is_open(&self, fd: i32) -> bool {
        self.get(fd).is_ok()
    }

    /// Open descriptors in ascending order.
    #[must_use]
    pub fn open_fds(&self) -> Vec<i32> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .filter_map(|(i, _)| i32::try_from(i).ok())
            .collect()
    }

    pub fn cloexec(&self, fd: i32) -> Result<bool, Errno> {
        let i = index(fd)?;
        self.slots
            .read()
            .get(i)
            .and_then(Option::as_ref)
            .map(|s| s.cloexec)
            .ok_or(Errno::EBADF)
    }

    /// `F_SETFD`: record the flag and flip native inheritance to match.
    pub fn set_cloexec(&self, fd: i32, cloexec: bool) -> Result<(), Errno> {
        let fh = {
            let i = index(fd)?;
            let mut slots = self.slots.write();
            let slot = slots.get_mut(i).and_then(Option::as_mut).ok_or(Errno::EBADF)?;
            slot.cloexec = cloexec;
            Arc::clone(&slot.fh)
        };
        fh.set_close_on_exec(cloexec)
    }

    // -----------------------------------------------------------------------
    // dup / dup2 / close
    // -----------------------------------------------------------------------

    /// `dup` and `F_DUPFD`: lowest free slot at or above `min`.
    pub fn dup_from(&self, fd: i32, min: i32, cloexec: bool) -> Result<i32, Errno> {
        let min = usize::try_from(min).map_err(|_| Errno::EINVAL)?;
        if min >= self.open_max {
            return Err(Errno::EINVAL);
        }
        let copy = self.get(fd)?.dup()?;
        if cloexec {
            copy.set_close_on_exec(true)?;
        }
        let new = self.install_from(min, copy, cloexec)?;
        log::trace!("dup({fd}) = {new}");
        Ok(new)
    }

    pub fn dup(&self, fd: i32) -> Result<i32, Errno> {
        self.dup_from(fd, 0, false)
    }

    /// `dup2`: an occupied target is closed first; `dup2(fd, fd)` only
    /// validates `fd`.
    pub fn dup2(&self, fd: i32, target: i32) -> Result<i32, Errno> {
        let t = index(target)?;
        if t >= self.open_max {
            return Err(Errno::EBADF);
        }
        let src = self.get(fd)?;
        if fd == target {
            return Ok(target);
        }
        let copy = src.dup()?;
        let old = {
            let mut slots = self.slots.write();
            if slots.len() <= t {
                slots.resize(t + 1, None);
            }
            slots[t].replace(Slot {
                fh: copy,
                cloexec: false,
            })
        };
        if let Some(old) = old {
            log::trace!("dup2: closing previous {target}");
            // The new description is in place whatever the old close says.
            if let Err(e) = release(&old.fh) {
                log::debug!("dup2: close of {target} failed: {e}");
            }
        }
        log::trace!("dup2({fd}, {target})");
        Ok(target)
    }

    /// Remove `fd`; the description closes when its last reference goes.
    pub fn close(&self, fd: i32) -> Result<(), Errno> {
        let i = index(fd)?;
        let slot = self
            .slots
            .write()
            .get_mut(i)
            .and_then(Option::take)
            .ok_or(Errno::EBADF)?;
        log::trace!("close({fd})");
        release(&slot.fh)
    }

    /// Close every descriptor (process exit).
    pub fn close_all(&self) {
        let slots = std::mem::take(&mut *self.slots.write());
        for slot in slots.into_iter().flatten() {
            let _ = release(&slot.fh);
        }
    }

    // -----------------------------------------------------------------------
    // fork / exec
    // -----------------------------------------------------------------------

    /// The child's table. Each description is copied once; slots that
    /// alias an archetype keep aliasing one copy. Handles the child did not
    /// inherit are duplicated from `parent` afterwards.
    pub fn fork(&self, child: &Arc<Env>, parent: &Process) -> Result<Self, Errno> {
        let mut copies: Vec<(*const u8, Arc<dyn Fhandler>)> = Vec::new();
        let out = match self.fork_slots(child, parent, &mut copies) {
            Ok(out) => out,
            Err(e) => {
                // Copies made before the failure own duplicated handles.
                for (_, fh) in &copies {
                    let _ = fh.close();
                }
                log::debug!(
                    "pid {}: fork into pid {} failed after {} copies: {e}",
                    parent.pid(),
                    child.pid(),
                    copies.len()
                );
                return Err(e);
            }
        };
        log::debug!(
            "pid {}: forked {} descriptions into pid {}",
            parent.pid(),
            copies.len(),
            child.pid()
        );
        Ok(Self {
            slots: RwLock::new(out),
            open_max: self.open_max,
        })
    }

    fn fork_slots(
        &self,
        child: &Arc<Env>,
        parent: &Process,
        copies: &mut Vec<(*const u8, Arc<dyn Fhandler>)>,
    ) -> Result<Vec<Option<Slot>>, Errno> {
        let slots = self.slots.read().clone();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let Some(slot) = slot else {
                out.push(None);
                continue;
            };
            let key = Arc::as_ptr(&slot.fh).cast::<u8>();
            let fh = match copies.iter().find(|(k, _)| *k == key) {
                Some((_, existing)) => {
                    existing.base().add_ref();
                    Arc::clone(existing)
                }
                None => {
                    let copy = slot.fh.fork_copy(child)?;
                    copies.push((key, Arc::clone(&copy)));
                    copy
                }
            };
            out.push(Some(Slot {
                fh,
                cloexec: slot.cloexec,
            }));
        }
        for (_, fh) in copies.iter() {
            fh.fixup_after_fork(parent)?;
        }
        Ok(out)
    }

    /// Drop close-on-exec descriptors; the rest reset transient state.
    pub fn exec(&self) {
        let (closing, surviving) = {
            let mut slots = self.slots.write();
            let mut closing = Vec::new();
            let mut surviving = Vec::new();
            for entry in slots.iter_mut() {
                let Some(slot) = entry.as_ref() else {
                    continue;
                };
                if slot.cloexec {
                    closing.extend(entry.take());
                } else {
                    surviving.push(Arc::clone(&slot.fh));
                }
            }
            (closing, surviving)
        };
        for slot in closing {
            let _ = release(&slot.fh);
        }
        for fh in surviving {
            fh.fixup_after_exec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::device::{DeviceClass, DevicePath};
    use crate::fhandler::FhBase;
    use crate::fhandler::null::NullHandler;
    use crate::flags::O_RDWR;
    use crate::testing::TestRig;

    fn null(rig: &TestRig) -> Arc<dyn Fhandler> {
        Arc::new(NullHandler::new(rig.env(), "/dev/null", false, O_RDWR))
    }

    #[test]
    fn lowest_free_slot() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(16);
        assert_eq!(t.install(null(&rig), false).unwrap(), 0);
        assert_eq!(t.install(null(&rig), false).unwrap(), 1);
        assert_eq!(t.install(null(&rig), false).unwrap(), 2);
        t.close(1).unwrap();
        assert_eq!(t.install(null(&rig), false).unwrap(), 1);
        assert_eq!(t.open_fds(), vec![0, 1, 2]);
    }

    #[test]
    fn bad_descriptors() {
        let t = DescriptorTable::new(8);
        assert_eq!(t.get(0).err(), Some(Errno::EBADF));
        assert_eq!(t.get(-1).err(), Some(Errno::EBADF));
        assert_eq!(t.close(3), Err(Errno::EBADF));
        assert_eq!(t.dup(0), Err(Errno::EBADF));
    }

    #[test]
    fn table_exhaustion() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(3);
        for _ in 0..3 {
            t.install(null(&rig), false).unwrap();
        }
        assert_eq!(t.install(null(&rig), false), Err(Errno::EMFILE));
        assert_eq!(t.dup(0), Err(Errno::EMFILE));
        assert_eq!(t.dup2(0, 3), Err(Errno::EBADF));
    }

    #[test]
    fn small_limits_are_honoured() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(2);
        assert_eq!(t.open_max(), 2);
        assert_eq!(t.install(null(&rig), false).unwrap(), 0);
        assert_eq!(t.install(null(&rig), false).unwrap(), 1);
        assert_eq!(t.install(null(&rig), false), Err(Errno::EMFILE));
        assert_eq!(DescriptorTable::new(0).open_max(), 1);
    }

    #[test]
    fn dup2_semantics() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(16);
        let fd = t.install(null(&rig), true).unwrap();
        assert_eq!(t.dup2(fd, fd).unwrap(), fd);
        assert_eq!(t.dup2(9, 2), Err(Errno::EBADF));
        assert_eq!(t.dup2(fd, 5).unwrap(), 5);
        assert!(!t.cloexec(5).unwrap());
        assert!(t.cloexec(fd).unwrap());
        // An occupied target is replaced.
        let other = t.install(null(&rig), false).unwrap();
        assert_eq!(t.dup2(fd, other).unwrap(), other);
        assert_eq!(t.open_fds(), vec![0, 1, 5]);
    }

    #[test]
    fn dup_from_minimum() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(16);
        let fd = t.install(null(&rig), false).unwrap();
        assert_eq!(t.dup_from(fd, 10, true).unwrap(), 10);
        assert!(t.cloexec(10).unwrap());
        assert_eq!(t.dup_from(fd, 10, false).unwrap(), 11);
        assert_eq!(t.dup_from(fd, 16, false), Err(Errno::EINVAL));
        assert_eq!(t.dup_from(fd, -1, false), Err(Errno::EINVAL));
    }

    #[test]
    fn exec_drops_cloexec_slots() {
        let rig = TestRig::new().build();
        let t = DescriptorTable::new(16);
        t.install(null(&rig), false).unwrap();
        t.install(null(&rig), true).unwrap();
        t.set_cloexec(0, false).unwrap();
        t.exec();
        assert_eq!(t.open_fds(), vec![0]);
    }

    /// Counts closes; refuses to fork once `fail_fork` is set.
    struct Tracked {
        base: FhBase,
        closed: Arc<AtomicUsize>,
        fail_fork: bool,
    }

    impl Tracked {
        fn new(rig: &TestRig, closed: &Arc<AtomicUsize>, fail_fork: bool) -> Arc<dyn Fhandler> {
            Arc::new(Self {
                base: FhBase::new(
                    rig.env(),
                    DeviceClass::Null,
                    DevicePath::Null.device_id(),
                    "/dev/null",
                    O_RDWR,
                ),
                closed: Arc::clone(closed),
                fail_fork,
            })
        }
    }

    impl Fhandler for Tracked {
        fn base(&self) -> &FhBase {
            &self.base
        }

        fn close(&self) -> Result<(), Errno> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
            Ok(self)
        }

        fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
            if self.fail_fork {
                return Err(Errno::EAGAIN);
            }
            Ok(Arc::new(Self {
                base: self.base.copy_for(child),
                closed: Arc::clone(&self.closed),
                fail_fork: false,
            }))
        }
    }

    #[test]
    fn failed_fork_closes_the_copies_already_made() {
        let rig = TestRig::new().build();
        let closed = Arc::new(AtomicUsize::new(0));
        let t = DescriptorTable::new(16);
        let shared = Tracked::new(&rig, &closed, false);
        t.install(Arc::clone(&shared), false).unwrap();
        shared.base().add_ref();
        t.install(shared, false).unwrap();
        t.install(Tracked::new(&rig, &closed, true), false).unwrap();

        let parent = &rig.env().process;
        let child = Arc::new(rig.env().fork_child(rig.kernel().fork_process(parent)));
        assert_eq!(t.fork(&child, parent).err(), Some(Errno::EAGAIN));
        // One copy was made for the two slots sharing a description.
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // The parent's descriptions are untouched.
        assert_eq!(t.open_fds(), vec![0, 1, 2]);
    }
}
