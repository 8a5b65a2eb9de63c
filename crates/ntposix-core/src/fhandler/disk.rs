//! Floppies (`/dev/fd<N>`) and hard disks (`/dev/sd<x>[<part>]`).
//!
//! The driver only moves whole sectors; this handle offers byte-granular
//! I/O on top. Unaligned reads go through a sector read-ahead buffer,
//! unaligned writes do a read-modify-write of the sector they touch.
//!
//! Mounted partitions refuse raw writes. A write that fails that way locks
//! every partition volume it spans and is reissued once; the locks are held
//! until close.

use std::sync::Arc;

use ntposix_native::disk::PartitionInfo;
use ntposix_native::object::DiskVolume;
use ntposix_native::{Partial, Process, WinError};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::raw::{RawBuffer, retry};
use crate::fhandler::{FhBase, Fhandler, NtHandle};
use crate::flags::{O_CLOEXEC, Stat, Whence, resolve_seek};
use crate::ioctl::{
    BLKGETSIZE, BLKGETSIZE64, BLKSSZGET, HDIO_GETGEO, HdGeometry, IoctlArg, RDIOCDOP, RDIOCGET,
    RDSETBLK,
};

/// Which medium a handle addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskUnit {
    Floppy(usize),
    /// Partition 0 is the whole disk.
    Hard { drive: usize, partition: u32 },
}

impl DiskUnit {
    fn path(self) -> DevicePath {
        match self {
            Self::Floppy(unit) => DevicePath::Floppy { unit },
            Self::Hard { drive, partition } => DevicePath::Disk { drive, partition },
        }
    }
}

#[derive(Debug)]
struct DiskState {
    /// Offset within the medium or partition.
    pos: u64,
    /// Device offset of the partition.
    start: u64,
    size: u64,
    sector: usize,
    heads: u32,
    sectors_per_track: u32,
    cylinders: u64,
    buf: RawBuffer,
    /// Device offset of the next buffered byte.
    cache_at: u64,
    locked: Vec<u32>,
}

impl DiskState {
    fn new() -> Self {
        Self {
            pos: 0,
            start: 0,
            size: 0,
            sector: 512,
            heads: 0,
            sectors_per_track: 0,
            cylinders: 0,
            buf: RawBuffer::new(512, false),
            cache_at: 0,
            locked: Vec::new(),
        }
    }

    fn copy(&self) -> Self {
        Self {
            buf: RawBuffer::new(self.buf.bufsize(), false),
            cache_at: 0,
            locked: Vec::new(),
            ..*self
        }
    }
}

pub struct DiskHandler {
    base: FhBase,
    unit: DiskUnit,
    handle: NtHandle,
    state: Mutex<DiskState>,
}

impl DiskHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, unit: DiskUnit, flags: i32) -> Self {
        let class = match unit {
            DiskUnit::Floppy(_) => DeviceClass::Floppy,
            DiskUnit::Hard { .. } => DeviceClass::Disk,
        };
        Self {
            base: FhBase::new(env, class, unit.path().device_id(), name, flags),
            unit,
            handle: NtHandle::empty(),
            state: Mutex::new(DiskState::new()),
        }
    }

    fn limit(&self) -> u32 {
        self.base.env().config.device_retry_limit
    }

    fn volume(&self) -> Result<DiskVolume, Errno> {
        let object = self.handle.object()?;
        Ok(object.as_disk()?.clone())
    }

    fn open_volume(&self, flags: i32) -> Result<(), Errno> {
        let env = self.base.env();
        let inherit = flags & O_CLOEXEC == 0;
        let owned = match self.unit {
            DiskUnit::Floppy(unit) => env.kernel.open_floppy(&env.process, unit, inherit)?,
            DiskUnit::Hard { drive, partition } => {
                env.kernel.open_disk(&env.process, drive, partition, inherit)?
            }
        };
        self.handle.bind(owned);
        let volume = self.volume()?;
        let geometry = retry(self.limit(), "disk geometry", || volume.driver.geometry())?;
        let (start, size) = if volume.partition == 0 {
            (0, volume.driver.length())
        } else {
            let part = volume
                .driver
                .partitions()
                .into_iter()
                .find(|p| p.number == volume.partition)
                .ok_or(Errno::ENOENT)?;
            (part.offset, part.length)
        };
        let sector = (geometry.bytes_per_sector as usize).max(1);
        let mut st = self.state.lock();
        *st = DiskState {
            pos: 0,
            start,
            size,
            sector,
            heads: geometry.tracks_per_cylinder,
            sectors_per_track: geometry.sectors_per_track,
            cylinders: geometry.cylinders,
            buf: RawBuffer::new(sector, false),
            cache_at: 0,
            locked: Vec::new(),
        };
        log::debug!(
            "{}: open, {size} bytes at {start}, sector {sector}",
            self.base.name()
        );
        Ok(())
    }

    /// Lock every partition volume `[offset, offset + len)` touches that is
    /// not locked yet. `false` when nothing new could be locked.
    fn lock_spanned(&self, volume: &DiskVolume, st: &mut DiskState, offset: u64, len: u64) -> bool {
        let spanned: Vec<PartitionInfo> = volume
            .driver
            .partitions()
            .into_iter()
            .filter(|p| p.overlaps(offset, len) && !st.locked.contains(&p.number))
            .collect();
        if spanned.is_empty() {
            return false;
        }
        for part in spanned {
            if let Err(e) = volume.driver.lock_volume(part.number) {
                log::debug!(
                    "{}: cannot lock partition {}: {e}",
                    self.base.name(),
                    part.number
                );
                return false;
            }
            st.locked.push(part.number);
        }
        true
    }

    /// One sector-aligned driver write, locking spanned volumes on refusal.
    fn write_through(
        &self,
        volume: &DiskVolume,
        st: &mut DiskState,
        offset: u64,
        bytes: &[u8],
    ) -> Result<usize, Partial> {
        let limit = self.limit();
        match retry(limit, "disk write", || volume.driver.write_at(offset, bytes)) {
            Err(p) if p.transferred == 0 && p.error == WinError::ACCESS_DENIED => {
                if !self.lock_spanned(volume, st, offset, bytes.len() as u64) {
                    return Err(p);
                }
                retry(limit, "disk write", || volume.driver.write_at(offset, bytes))
            }
            other => other,
        }
    }

    fn unlock_all(&self, st: &mut DiskState) {
        if st.locked.is_empty() {
            return;
        }
        if let Ok(volume) = self.volume() {
            for part in st.locked.drain(..) {
                volume.driver.unlock_volume(part);
            }
        }
    }
}

impl Fhandler for DiskHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let result = self.open_volume(flags);
        if result.is_err() {
            self.handle.close();
        }
        result
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let volume = self.volume()?;
        let limit = self.limit();
        let mut st = self.state.lock();
        let st = &mut *st;
        if st.pos >= st.size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(usize::try_from(st.size - st.pos).unwrap_or(usize::MAX));
        let sector = st.sector as u64;
        let mut done = 0;
        while done < len {
            let abs = st.start + st.pos;
            if st.buf.buffered() > 0 && st.cache_at == abs {
                let n = st.buf.take(&mut buf[done..len]);
                st.cache_at += n as u64;
                st.pos += n as u64;
                done += n;
                continue;
            }
            let remaining = len - done;
            if abs % sector == 0 && remaining >= st.buf.bufsize() {
                let n = remaining / st.sector * st.sector;
                let target = &mut buf[done..done + n];
                match retry(limit, "disk read", || volume.driver.read_at(abs, target)) {
                    Ok(0) => break,
                    Ok(got) => {
                        done += got;
                        st.pos += got as u64;
                    }
                    Err(p) => {
                        done += p.transferred;
                        st.pos += p.transferred as u64;
                        if done == 0 {
                            return Err(Errno::from(p.error));
                        }
                        break;
                    }
                }
                continue;
            }
            let origin = abs - abs % sector;
            let got = match retry(limit, "disk read", || {
                volume.driver.read_at(origin, st.buf.fill_space())
            }) {
                Ok(n) => n,
                Err(p) if done > 0 || p.transferred > 0 => p.transferred,
                Err(p) => return Err(Errno::from(p.error)),
            };
            st.buf.set_filled(got);
            let skip = (abs - origin) as usize;
            if got <= skip {
                st.buf.reset();
                break;
            }
            st.buf.skip(skip);
            st.cache_at = abs;
        }
        Ok(done)
    }

    fn write(&self, data: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let volume = self.volume()?;
        let limit = self.limit();
        let mut st = self.state.lock();
        let st = &mut *st;
        if st.pos >= st.size {
            return Err(Errno::ENOSPC);
        }
        let len = data.len().min(usize::try_from(st.size - st.pos).unwrap_or(usize::MAX));
        st.buf.reset();
        let sector = st.sector;
        let mut done = 0;
        while done < len {
            let abs = st.start + st.pos;
            let head = (abs % sector as u64) as usize;
            let remaining = len - done;
            let result = if head != 0 || remaining < sector {
                let origin = abs - head as u64;
                let mut block = vec![0u8; sector];
                match retry(limit, "disk read", || volume.driver.read_at(origin, &mut block)) {
                    Ok(_) => {
                        let n = (sector - head).min(remaining);
                        block[head..head + n].copy_from_slice(&data[done..done + n]);
                        self.write_through(&volume, st, origin, &block)
                            .map(|_| n)
                            .map_err(|p| Partial::none(p.error))
                    }
                    Err(p) => Err(Partial::none(p.error)),
                }
            } else {
                let n = remaining / sector * sector;
                self.write_through(&volume, st, abs, &data[done..done + n])
            };
            match result {
                Ok(n) => {
                    done += n;
                    st.pos += n as u64;
                }
                Err(p) => {
                    done += p.transferred;
                    st.pos += p.transferred as u64;
                    if done > 0 {
                        break;
                    }
                    log::debug!("{}: write at {abs}: {}", self.base.name(), p.error);
                    return Err(Errno::from(p.error));
                }
            }
        }
        Ok(done)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let mut st = self.state.lock();
        let pos = resolve_seek(st.pos, st.size, offset, whence).ok_or(Errno::EINVAL)?;
        if pos > st.size {
            return Err(Errno::EINVAL);
        }
        st.pos = pos;
        Ok(pos)
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        let mut st = self.state.lock();
        match (cmd, arg) {
            (HDIO_GETGEO, IoctlArg::Geometry(geo)) => {
                *geo = HdGeometry {
                    heads: u8::try_from(st.heads).unwrap_or(u8::MAX),
                    sectors: u8::try_from(st.sectors_per_track).unwrap_or(u8::MAX),
                    cylinders: u16::try_from(st.cylinders).unwrap_or(u16::MAX),
                    start: st.start / st.sector as u64,
                };
                Ok(0)
            }
            (BLKGETSIZE64, IoctlArg::IntOut(out)) => {
                *out = i64::try_from(st.size).unwrap_or(i64::MAX);
                Ok(0)
            }
            (BLKGETSIZE, IoctlArg::IntOut(out)) => {
                *out = i64::try_from(st.size / 512).unwrap_or(i64::MAX);
                Ok(0)
            }
            (BLKSSZGET, IoctlArg::IntOut(out)) => {
                *out = st.sector as i64;
                Ok(0)
            }
            (RDIOCDOP, IoctlArg::RdOp(op)) => {
                let size = op.rd_parm as usize;
                if op.rd_op != RDSETBLK || size % st.sector != 0 {
                    return Err(Errno::EINVAL);
                }
                st.buf.set_size(size)?;
                Ok(0)
            }
            (RDIOCGET, IoctlArg::RdGet(out)) => {
                *out = u32::try_from(st.buf.bufsize()).unwrap_or(u32::MAX);
                Ok(0)
            }
            (HDIO_GETGEO | BLKGETSIZE64 | BLKGETSIZE | BLKSSZGET | RDIOCDOP | RDIOCGET, _) => {
                Err(Errno::EINVAL)
            }
            (cmd, arg) => {
                drop(st);
                self.base.ioctl(cmd, &arg)
            }
        }
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let st = self.state.lock();
        let mut stat = self.base.stat();
        stat.st_size = i64::try_from(st.size).unwrap_or(i64::MAX);
        stat.st_blksize = st.sector as i64;
        stat.st_blocks = stat.st_size / 512;
        Ok(stat)
    }

    fn close(&self) -> Result<(), Errno> {
        let mut st = self.state.lock();
        self.unlock_all(&mut st);
        self.handle.close();
        Ok(())
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
            unit: self.unit,
            handle: self.handle.duplicate(true)?,
            state: Mutex::new(self.state.lock().copy()),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
            unit: self.unit,
            handle: self.handle.fork_copy(&child.process)?,
            state: Mutex::new(self.state.lock().copy()),
        }))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn fixup_after_exec(&self) {
        self.state.lock().buf.reset();
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{O_RDONLY, O_RDWR, S_IFBLK};
    use crate::testing::TestRig;
    use ntposix_native::disk::SimDisk;

    fn open(rig: &TestRig, name: &str, unit: DiskUnit, flags: i32) -> Arc<DiskHandler> {
        let fh = Arc::new(DiskHandler::new(rig.env(), name, unit, flags));
        fh.open(flags, 0).unwrap();
        fh
    }

    #[test]
    fn unaligned_io_is_byte_granular() {
        let floppy = Arc::new(SimDisk::floppy());
        let rig = TestRig::new().floppy(Arc::clone(&floppy)).build();
        let fh = open(&rig, "/dev/fd0", DiskUnit::Floppy(0), O_RDWR);
        assert_eq!(fh.lseek(510, Whence::Set).unwrap(), 510);
        assert_eq!(fh.write(b"hello").unwrap(), 5);
        assert_eq!(floppy.snapshot(510, 5), b"hello".to_vec());
        fh.lseek(509, Whence::Set).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(fh.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"\0he");
        assert_eq!(fh.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"llo");
    }

    #[test]
    fn end_of_medium_reads_zero_and_writes_enospc() {
        let disk = Arc::new(SimDisk::new(4, 512));
        let rig = TestRig::new().disk(disk).build();
        let fh = open(
            &rig,
            "/dev/sda",
            DiskUnit::Hard {
                drive: 0,
                partition: 0,
            },
            O_RDWR,
        );
        assert_eq!(fh.lseek(0, Whence::End).unwrap(), 2048);
        let mut buf = [0u8; 16];
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
        assert_eq!(fh.write(b"x"), Err(Errno::ENOSPC));
        assert_eq!(fh.lseek(1, Whence::End), Err(Errno::EINVAL));
        fh.lseek(-4, Whence::End).unwrap();
        assert_eq!(fh.write(b"abcdefgh").unwrap(), 4);
    }

    #[test]
    fn write_spanning_mounted_partitions_locks_them() {
        let disk = Arc::new(SimDisk::new(32, 512));
        let p1 = disk.add_partition(0, 16, true);
        let p2 = disk.add_partition(16, 16, true);
        let rig = TestRig::new().disk(Arc::clone(&disk)).build();
        let fh = open(
            &rig,
            "/dev/sda",
            DiskUnit::Hard {
                drive: 0,
                partition: 0,
            },
            O_RDWR,
        );
        fh.lseek(15 * 512, Whence::Set).unwrap();
        assert_eq!(fh.write(&[9u8; 1024]).unwrap(), 1024);
        assert!(disk.is_locked(p1) && disk.is_locked(p2));
        fh.close().unwrap();
        assert!(!disk.is_locked(p1) && !disk.is_locked(p2));
    }

    #[test]
    fn failed_lock_surfaces_the_original_error() {
        let disk = Arc::new(SimDisk::new(32, 512));
        disk.add_partition(0, 16, true);
        let p2 = disk.add_partition(16, 16, true);
        disk.set_busy(p2, true);
        let rig = TestRig::new().disk(Arc::clone(&disk)).build();
        let fh = open(
            &rig,
            "/dev/sda",
            DiskUnit::Hard {
                drive: 0,
                partition: 0,
            },
            O_RDWR,
        );
        fh.lseek(15 * 512, Whence::Set).unwrap();
        assert_eq!(fh.write(&[9u8; 1024]), Err(Errno::EACCES));
        assert_eq!(disk.snapshot(15 * 512, 4), vec![0u8; 4]);
    }

    #[test]
    fn partition_bounds_and_ioctls() {
        let disk = Arc::new(SimDisk::new(64, 512));
        let part = disk.add_partition(8, 16, false);
        let rig = TestRig::new().disk(disk).build();
        let fh = open(
            &rig,
            "/dev/sda1",
            DiskUnit::Hard {
                drive: 0,
                partition: part,
            },
            O_RDONLY,
        );
        let mut size = 0i64;
        fh.ioctl(BLKGETSIZE64, IoctlArg::IntOut(&mut size)).unwrap();
        assert_eq!(size, 16 * 512);
        fh.ioctl(BLKGETSIZE, IoctlArg::IntOut(&mut size)).unwrap();
        assert_eq!(size, 16);
        fh.ioctl(BLKSSZGET, IoctlArg::IntOut(&mut size)).unwrap();
        assert_eq!(size, 512);
        let mut geo = HdGeometry::default();
        fh.ioctl(HDIO_GETGEO, IoctlArg::Geometry(&mut geo)).unwrap();
        assert_eq!(geo.start, 8);
        assert_eq!(geo.heads, 16);
        let st = fh.fstat().unwrap();
        assert_eq!(st.file_type(), S_IFBLK);
        assert_eq!(st.st_size, 16 * 512);
        assert_eq!(fh.write(b"x"), Err(Errno::EBADF));
    }

    #[test]
    fn buffer_size_must_be_a_sector_multiple() {
        let rig = TestRig::new().floppy(Arc::new(SimDisk::floppy())).build();
        let fh = open(&rig, "/dev/fd0", DiskUnit::Floppy(0), O_RDONLY);
        let bad = crate::ioctl::RdOp {
            rd_op: RDSETBLK,
            rd_parm: 700,
        };
        assert_eq!(fh.ioctl(RDIOCDOP, IoctlArg::RdOp(&bad)), Err(Errno::EINVAL));
        let good = crate::ioctl::RdOp {
            rd_op: RDSETBLK,
            rd_parm: 4096,
        };
        fh.ioctl(RDIOCDOP, IoctlArg::RdOp(&good)).unwrap();
        let mut size = 0u32;
        fh.ioctl(RDIOCGET, IoctlArg::RdGet(&mut size)).unwrap();
        assert_eq!(size, 4096);
    }
}
