//! Test fixtures: a process on a kernel with simulated devices.
//!
//! ```ignore
//! let rig = TestRig::new().memory(4, 4096).build();
//! let fd = rig.context().open("/dev/mem", O_RDONLY, 0)?;
//! ```

use std::sync::Arc;

use ntposix_native::disk::{DiskDriver, SimDisk};
use ntposix_native::serial::SerialPort;
use ntposix_native::tape::{SimTape, TapeDriver};
use ntposix_native::{Kernel, KernelBuilder};

use crate::config::RuntimeConfig;
use crate::context::ProcessContext;
use crate::env::Env;
use crate::security::{AllowAll, PermissionOracle, UserContext};

/// Builder for [`TestRig`]. Each device category left empty gets the
/// default simulated device: one tape, a disk with two partitions (the
/// first mounted), a floppy and one serial port.
pub struct RigBuilder {
    tapes: Vec<Arc<dyn TapeDriver>>,
    disks: Vec<Arc<dyn DiskDriver>>,
    floppies: Vec<Arc<dyn DiskDriver>>,
    serials: Vec<Arc<SerialPort>>,
    memory: Option<(usize, usize)>,
    config: RuntimeConfig,
    oracle: Arc<dyn PermissionOracle>,
    user: UserContext,
}

impl RigBuilder {
    #[must_use]
    pub fn tape(mut self, tape: Arc<SimTape>) -> Self {
        self.tapes.push(tape);
        self
    }

    #[must_use]
    pub fn disk(mut self, disk: Arc<SimDisk>) -> Self {
        self.disks.push(disk);
        self
    }

    #[must_use]
    pub fn floppy(mut self, floppy: Arc<SimDisk>) -> Self {
        self.floppies.push(floppy);
        self
    }

    #[must_use]
    pub fn serial(mut self, port: Arc<SerialPort>) -> Self {
        self.serials.push(port);
        self
    }

    #[must_use]
    pub fn memory(mut self, pages: usize, page_size: usize) -> Self {
        self.memory = Some((pages, page_size));
        self
    }

    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn oracle(mut self, oracle: Arc<dyn PermissionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    #[must_use]
    pub fn user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    /// # Panics
    ///
    /// If the kernel namespace cannot be populated.
    #[must_use]
    pub fn build(self) -> TestRig {
        let mut builder = KernelBuilder::new();
        if self.tapes.is_empty() {
            builder = builder.tape(Arc::new(SimTape::new(4096)));
        }
        for tape in self.tapes {
            builder = builder.tape(tape);
        }
        if self.disks.is_empty() {
            let disk = SimDisk::new(2048, 512);
            disk.add_partition(64, 960, true);
            disk.add_partition(1024, 1024, false);
            builder = builder.disk(Arc::new(disk));
        }
        for disk in self.disks {
            builder = builder.disk(disk);
        }
        if self.floppies.is_empty() {
            builder = builder.floppy(Arc::new(SimDisk::floppy()));
        }
        for floppy in self.floppies {
            builder = builder.floppy(floppy);
        }
        if self.serials.is_empty() {
            builder = builder.serial(Arc::new(SerialPort::new()));
        }
        for port in self.serials {
            builder = builder.serial(port);
        }
        if let Some((pages, page_size)) = self.memory {
            builder = builder.physical_memory(pages, page_size);
        }
        let kernel = builder.build().expect("simulated kernel");
        let context = ProcessContext::new(kernel, self.config, self.oracle, self.user);
        TestRig { context }
    }
}

/// One process with an empty descriptor table.
#[derive(Debug)]
pub struct TestRig {
    context: ProcessContext,
}

impl TestRig {
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new() -> RigBuilder {
        RigBuilder {
            tapes: Vec::new(),
            disks: Vec::new(),
            floppies: Vec::new(),
            serials: Vec::new(),
            memory: None,
            config: RuntimeConfig::default(),
            oracle: Arc::new(AllowAll),
            user: UserContext::default(),
        }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<Env> {
        self.context.env()
    }

    #[must_use]
    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.context.env().kernel
    }
}
