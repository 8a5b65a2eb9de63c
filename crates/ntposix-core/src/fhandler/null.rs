//! `/dev/null` and `/dev/zero`.

use std::sync::Arc;

use crate::device::{DeviceClass, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::{FhBase, Fhandler};
use crate::flags::Whence;

pub struct NullHandler {
    base: FhBase,
}

impl NullHandler {
    /// `zero` selects `/dev/zero` semantics for reads.
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, zero: bool, flags: i32) -> Self {
        let (class, path) = if zero {
            (DeviceClass::Zero, DevicePath::Zero)
        } else {
            (DeviceClass::Null, DevicePath::Null)
        };
        Self {
            base: FhBase::new(env, class, path.device_id(), name, flags),
        }
    }
}

impl Fhandler for NullHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        match self.base.class() {
            DeviceClass::Zero => {
                buf.fill(0);
                Ok(buf.len())
            }
            _ => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        Ok(buf.len())
    }

    fn lseek(&self, _offset: i64, _whence: Whence) -> Result<u64, Errno> {
        Ok(0)
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.dup_copy(),
        }))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        Ok(Arc::new(Self {
            base: self.base.copy_for(child),
        }))
    }
}
