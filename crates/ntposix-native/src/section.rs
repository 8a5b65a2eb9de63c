//! Physical memory sections (`\Device\PhysicalMemory`).

use parking_lot::RwLock;

use crate::status::NtStatus;

/// A flat byte range standing in for the machine's physical memory.
#[derive(Debug)]
pub struct PhysicalMemory {
    bytes: RwLock<Vec<u8>>,
    page_size: usize,
}

impl PhysicalMemory {
    #[must_use]
    pub fn new(pages: usize, page_size: usize) -> Self {
        Self {
            bytes: RwLock::new(vec![0; pages * page_size]),
            page_size,
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.read().len() as u64
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Copy out of the section. Reads that start past the end fail; reads
    /// that run past it are clamped.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, NtStatus> {
        let bytes = self.bytes.read();
        let start = usize::try_from(offset).map_err(|_| NtStatus::INVALID_PARAMETER)?;
        if start > bytes.len() {
            return Err(NtStatus::INVALID_PARAMETER);
        }
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, NtStatus> {
        let mut bytes = self.bytes.write();
        let start = usize::try_from(offset).map_err(|_| NtStatus::INVALID_PARAMETER)?;
        if start > bytes.len() {
            return Err(NtStatus::INVALID_PARAMETER);
        }
        let n = buf.len().min(bytes.len() - start);
        bytes[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}
