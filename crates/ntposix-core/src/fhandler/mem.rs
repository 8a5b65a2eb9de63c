//! `/dev/mem`, `/dev/kmem` and `/dev/port` over the physical memory section.

use std::sync::Arc;

use ntposix_native::Process;
use ntposix_native::section::PhysicalMemory;
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler, NtHandle};
use crate::flags::{O_APPEND, O_CLOEXEC, O_EXCL, O_TRUNC, Stat, Whence, resolve_seek};

/// Size of the `/dev/port` window.
pub const PORT_SIZE: u64 = 64 * 1024;

pub struct MemHandler {
    base: FhBase,
    unit: u32,
    handle: NtHandle,
    pos: Mutex<u64>,
}

impl MemHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, unit: u32, flags: i32) -> Self {
        let dev = DevicePath::Mem { unit }.device_id();
        Self {
            base: FhBase::new(env, DeviceClass::Mem, dev, name, flags),
            unit,
            handle: NtHandle::empty(),
            pos: Mutex::new(0),
        }
    }

    fn section(&self) -> Result<Arc<PhysicalMemory>, Errno> {
        let object = self.handle.object()?;
        Ok(Arc::clone(object.as_section()?))
    }

    /// Bytes addressable through this unit.
    fn size(&self, section: &PhysicalMemory) -> u64 {
        match self.unit {
            1 => section.size(),
            4 => PORT_SIZE.min(section.size()),
            _ => 0,
        }
    }
}

impl Fhandler for MemHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        if flags & (O_APPEND | O_TRUNC | O_EXCL) != 0 {
            log::debug!("{}: invalid open flags {flags:#o}", self.base.name());
            return Err(Errno::EINVAL);
        }
        let env = self.base.env();
        let owned = env
            .kernel
            .open_physical_memory(&env.process, flags & O_CLOEXEC == 0)?;
        self.handle.bind(owned);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let section = self.section()?;
        let size = self.size(&section);
        let mut pos = self.pos.lock();
        if *pos >= size {
            return Ok(0);
        }
        let n = buf
            .len()
            .min(usize::try_from(size - *pos).unwrap_or(usize::MAX));
        let got = section.read_at(*pos, &mut buf[..n])?;
        *pos += got as u64;
        Ok(got)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let section = self.section()?;
        let size = self.size(&section);
        let mut pos = self.pos.lock();
        if *pos >= size {
            return Ok(0);
        }
        let n = buf
            .len()
            .min(usize::try_from(size - *pos).unwrap_or(usize::MAX));
        let put = section.write_at(*pos, &buf[..n])?;
        *pos += put as u64;
        Ok(put)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let section = self.section()?;
        let size = self.size(&section);
        let mut pos = self.pos.lock();
        let target = resolve_seek(*pos, size, offset, whence).ok_or(Errno::EINVAL)?;
        if target > size {
            return Err(Errno::EINVAL);
        }
        *pos = target;
        Ok(target)
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let section = self.section()?;
        let mut st = self.base.stat();
        st.st_blksize = i64::try_from(section.page_size()).unwrap_or(i64::MAX);
        st.st_size = i64::try_from(self.size(&section)).unwrap_or(i64::MAX);
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        self.handle.close();
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            unit: self.unit,
            handle: self.handle.duplicate(true)?,
            pos: Mutex::new(*self.pos.lock()),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            unit: self.unit,
            handle: self.handle.fork_copy(&child.process)?,
            pos: Mutex::new(*self.pos.lock()),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_RDONLY, O_RDWR, O_WRONLY};
    use crate::testing::TestRig;

    fn open(rig: &TestRig, unit: u32, flags: i32) -> Result<MemHandler, Errno> {
        let fh = MemHandler::new(rig.env(), "/dev/mem", unit, flags);
        fh.open(flags, 0)?;
        Ok(fh)
    }

    #[test]
    fn bad_open_flags_are_rejected() {
        let rig = TestRig::new().build();
        assert_eq!(open(&rig, 1, O_RDWR | O_TRUNC).err(), Some(Errno::EINVAL));
        assert_eq!(open(&rig, 1, O_RDWR | O_APPEND).err(), Some(Errno::EINVAL));
    }

    #[test]
    fn io_is_clamped_to_the_device() {
        let rig = TestRig::new().memory(4, 4096).build();
        let fh = open(&rig, 1, O_RDWR).unwrap();
        assert_eq!(fh.lseek(-2, Whence::End).unwrap(), 16382);
        assert_eq!(fh.write(b"abcd").unwrap(), 2);
        assert_eq!(fh.write(b"x").unwrap(), 0);
        fh.lseek(16382, Whence::Set).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fh.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(fh.lseek(1, Whence::End), Err(Errno::EINVAL));
    }

    #[test]
    fn kmem_is_empty_and_access_follows_open_mode() {
        let rig = TestRig::new().build();
        let kmem = open(&rig, 2, O_RDONLY).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(kmem.read(&mut buf).unwrap(), 0);
        assert_eq!(kmem.write(b"x"), Err(Errno::EBADF));
        let wo = open(&rig, 1, O_WRONLY).unwrap();
        assert_eq!(wo.read(&mut buf), Err(Errno::EBADF));
    }

    #[test]
    fn stat_reports_page_size() {
        let rig = TestRig::new().memory(32, 4096).build();
        let port = open(&rig, 4, O_RDONLY).unwrap();
        let st = port.fstat().unwrap();
        assert_eq!(st.st_blksize, 4096);
        assert_eq!(st.st_size, 64 * 1024);
    }
}
