//! Disks and floppies.
//!
//! Driver I/O is sector-granular: offsets and lengths must be multiples of
//! the sector size. Writes that touch a mounted partition are refused with
//! `ACCESS_DENIED` unless that partition's volume is locked, which is the
//! raw-disk write restriction the descriptor layer has to work around.

use std::collections::HashSet;

use parking_lot::{Mutex, RwLock};

use crate::fault::FaultPlan;
use crate::status::{Partial, WinError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

/// A partition; number 0 is reserved for the whole disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub number: u32,
    pub offset: u64,
    pub length: u64,
}

impl PartitionInfo {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    #[must_use]
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        len > 0 && start < self.end() && self.offset < start + len
    }
}

/// Primitive operations a block device provides.
pub trait DiskDriver: Send + Sync {
    fn geometry(&self) -> Result<DiskGeometry, WinError>;
    /// Size of the whole medium in bytes.
    fn length(&self) -> u64;
    fn is_removable(&self) -> bool;
    fn partitions(&self) -> Vec<PartitionInfo>;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Partial>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Partial>;
    fn lock_volume(&self, partition: u32) -> Result<(), WinError>;
    fn unlock_volume(&self, partition: u32);
}

// ---------------------------------------------------------------------------
// Simulated disk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SimPartition {
    info: PartitionInfo,
    mounted: bool,
    busy: bool,
}

/// An in-memory disk.
#[derive(Debug)]
pub struct SimDisk {
    data: RwLock<Vec<u8>>,
    sector_size: u32,
    sectors_per_track: u32,
    heads: u32,
    removable: bool,
    partitions: RwLock<Vec<SimPartition>>,
    locks: Mutex<HashSet<u32>>,
    faults: FaultPlan,
}

impl SimDisk {
    /// A fixed disk of `sectors` sectors with no partitions.
    #[must_use]
    pub fn new(sectors: u64, sector_size: u32) -> Self {
        Self {
            data: RwLock::new(vec![0; (sectors * u64::from(sector_size)) as usize]),
            sector_size,
            sectors_per_track: 63,
            heads: 16,
            removable: false,
            partitions: RwLock::new(Vec::new()),
            locks: Mutex::new(HashSet::new()),
            faults: FaultPlan::new(),
        }
    }

    /// A 1.44M floppy: 80 cylinders, 2 heads, 18 sectors of 512 bytes.
    #[must_use]
    pub fn floppy() -> Self {
        let mut disk = Self::new(80 * 2 * 18, 512);
        disk.sectors_per_track = 18;
        disk.heads = 2;
        disk.removable = true;
        disk
    }

    /// Add a partition covering `sectors` sectors starting at `first_sector`.
    /// Mounted partitions refuse raw writes until locked.
    pub fn add_partition(&self, first_sector: u64, sectors: u64, mounted: bool) -> u32 {
        let mut partitions = self.partitions.write();
        let number = partitions.len() as u32 + 1;
        let sector = u64::from(self.sector_size);
        partitions.push(SimPartition {
            info: PartitionInfo {
                number,
                offset: first_sector * sector,
                length: sectors * sector,
            },
            mounted,
            busy: false,
        });
        number
    }

    /// A busy volume (open files on it) cannot be locked.
    pub fn set_busy(&self, partition: u32, busy: bool) {
        if let Some(p) = self
            .partitions
            .write()
            .iter_mut()
            .find(|p| p.info.number == partition)
        {
            p.busy = busy;
        }
    }

    #[must_use]
    pub fn is_locked(&self, partition: u32) -> bool {
        self.locks.lock().contains(&partition)
    }

    #[must_use]
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Direct view of the medium for test assertions.
    #[must_use]
    pub fn snapshot(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.read();
        let start = (offset as usize).min(data.len());
        let end = (start + len).min(data.len());
        data[start..end].to_vec()
    }

    fn check_alignment(&self, offset: u64, len: usize) -> Result<(), WinError> {
        let sector = u64::from(self.sector_size);
        if offset % sector != 0 || len as u64 % sector != 0 {
            return Err(WinError::INVALID_PARAMETER);
        }
        Ok(())
    }
}

impl DiskDriver for SimDisk {
    fn geometry(&self) -> Result<DiskGeometry, WinError> {
        let per_cylinder = u64::from(self.heads) * u64::from(self.sectors_per_track);
        let sectors = self.length() / u64::from(self.sector_size);
        Ok(DiskGeometry {
            cylinders: sectors / per_cylinder,
            tracks_per_cylinder: self.heads,
            sectors_per_track: self.sectors_per_track,
            bytes_per_sector: self.sector_size,
        })
    }

    fn length(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn is_removable(&self) -> bool {
        self.removable
    }

    fn partitions(&self) -> Vec<PartitionInfo> {
        self.partitions.read().iter().map(|p| p.info).collect()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Partial> {
        self.faults.check()?;
        self.check_alignment(offset, buf.len())?;
        let data = self.data.read();
        let len = data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - offset) as usize);
        let start = offset as usize;
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Partial> {
        self.faults.check()?;
        self.check_alignment(offset, buf.len())?;
        {
            let partitions = self.partitions.read();
            let locks = self.locks.lock();
            let blocked = partitions.iter().any(|p| {
                p.mounted
                    && p.info.overlaps(offset, buf.len() as u64)
                    && !locks.contains(&p.info.number)
            });
            if blocked {
                return Err(Partial::none(WinError::ACCESS_DENIED));
            }
        }
        let mut data = self.data.write();
        let len = data.len() as u64;
        if offset >= len {
            return Err(Partial::none(WinError::DISK_FULL));
        }
        let n = buf.len().min((len - offset) as usize);
        let start = offset as usize;
        data[start..start + n].copy_from_slice(&buf[..n]);
        if n < buf.len() {
            return Err(Partial::new(n, WinError::DISK_FULL));
        }
        Ok(n)
    }

    fn lock_volume(&self, partition: u32) -> Result<(), WinError> {
        let partitions = self.partitions.read();
        let p = partitions
            .iter()
            .find(|p| p.info.number == partition)
            .ok_or(WinError::FILE_NOT_FOUND)?;
        if p.busy {
            return Err(WinError::ACCESS_DENIED);
        }
        self.locks.lock().insert(partition);
        log::debug!("disk: locked volume of partition {partition}");
        Ok(())
    }

    fn unlock_volume(&self, partition: u32) {
        self.locks.lock().remove(&partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_must_be_sector_aligned() {
        let d = SimDisk::new(8, 512);
        let mut buf = [0u8; 100];
        assert_eq!(
            d.read_at(0, &mut buf),
            Err(Partial::none(WinError::INVALID_PARAMETER))
        );
        let mut buf = [0u8; 512];
        assert_eq!(d.read_at(512, &mut buf), Ok(512));
    }

    #[test]
    fn mounted_partition_requires_lock() {
        let d = SimDisk::new(16, 512);
        let p = d.add_partition(8, 8, true);
        let block = [7u8; 512];
        assert_eq!(
            d.write_at(8 * 512, &block),
            Err(Partial::none(WinError::ACCESS_DENIED))
        );
        assert_eq!(d.write_at(0, &block), Ok(512));
        d.lock_volume(p).unwrap();
        assert_eq!(d.write_at(8 * 512, &block), Ok(512));
        d.unlock_volume(p);
        assert!(!d.is_locked(p));
    }

    #[test]
    fn busy_volume_cannot_be_locked() {
        let d = SimDisk::new(16, 512);
        let p = d.add_partition(0, 16, true);
        d.set_busy(p, true);
        assert_eq!(d.lock_volume(p), Err(WinError::ACCESS_DENIED));
    }

    #[test]
    fn write_past_end_is_disk_full() {
        let d = SimDisk::new(2, 512);
        let buf = [1u8; 1024];
        assert_eq!(
            d.write_at(512, &buf),
            Err(Partial::new(512, WinError::DISK_FULL))
        );
    }

    #[test]
    fn floppy_geometry() {
        let f = SimDisk::floppy();
        let g = f.geometry().unwrap();
        assert_eq!(g.cylinders, 80);
        assert_eq!(g.tracks_per_cylinder, 2);
        assert_eq!(f.length(), 1_474_560);
        assert!(f.is_removable());
    }
}
