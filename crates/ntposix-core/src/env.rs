//! Per-process environment shared by every handle of the process.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ntposix_native::{Kernel, Process};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::device::DeviceId;
use crate::dtable::DescriptorTable;
use crate::errno::Errno;
use crate::fhandler::Fhandler;
use crate::security::{PermissionOracle, UserContext};
use crate::signal::SignalState;

/// What a handle needs to know about the process that owns it.
pub struct Env {
    pub kernel: Arc<Kernel>,
    pub process: Arc<Process>,
    pub signals: Arc<SignalState>,
    pub config: RuntimeConfig,
    pub oracle: Arc<dyn PermissionOracle>,
    pub user: UserContext,
    pub pgid: u32,
    exename: Mutex<String>,
    cmdline: Mutex<Vec<String>>,
    archetypes: Mutex<HashMap<DeviceId, Weak<dyn Fhandler>>>,
    fds: Mutex<Weak<DescriptorTable>>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("pid", &self.process.pid())
            .field("user", &self.user.name)
            .finish_non_exhaustive()
    }
}

impl Env {
    #[must_use]
    pub fn new(
        kernel: Arc<Kernel>,
        process: Arc<Process>,
        config: RuntimeConfig,
        oracle: Arc<dyn PermissionOracle>,
        user: UserContext,
    ) -> Self {
        let pgid = process.pid();
        Self {
            kernel,
            process,
            signals: Arc::new(SignalState::new()),
            config,
            oracle,
            user,
            pgid,
            exename: Mutex::new("/usr/bin/sh".to_owned()),
            cmdline: Mutex::new(vec!["sh".to_owned()]),
            archetypes: Mutex::new(HashMap::new()),
            fds: Mutex::new(Weak::new()),
        }
    }

    /// The environment a forked child starts with.
    #[must_use]
    pub fn fork_child(&self, process: Arc<Process>) -> Self {
        Self {
            kernel: Arc::clone(&self.kernel),
            process,
            signals: Arc::new(self.signals.fork_copy()),
            config: self.config.clone(),
            oracle: Arc::clone(&self.oracle),
            user: self.user.clone(),
            pgid: self.pgid,
            exename: Mutex::new(self.exename()),
            cmdline: Mutex::new(self.cmdline()),
            archetypes: Mutex::new(HashMap::new()),
            fds: Mutex::new(Weak::new()),
        }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    #[must_use]
    pub fn wait_slice(&self) -> Duration {
        self.config.wait_slice()
    }

    /// A signal is pending that should abort a blocking call.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.signals.interrupted()
    }

    #[must_use]
    pub fn exename(&self) -> String {
        self.exename.lock().clone()
    }

    #[must_use]
    pub fn cmdline(&self) -> Vec<String> {
        self.cmdline.lock().clone()
    }

    pub fn set_image(&self, exename: &str, argv: &[String]) {
        *self.exename.lock() = exename.to_owned();
        *self.cmdline.lock() = argv.to_vec();
    }

    // -----------------------------------------------------------------------
    // Archetypes
    // -----------------------------------------------------------------------

    /// The live shared handle for `dev`, if one is open.
    #[must_use]
    pub fn archetype(&self, dev: DeviceId) -> Option<Arc<dyn Fhandler>> {
        self.archetypes
            .lock()
            .get(&dev)
            .and_then(Weak::upgrade)
            .filter(|fh| fh.base().refs() > 0)
    }

    /// Take a new reference to the open archetype for `dev`, or build,
    /// open and register one. The lookup and the registration happen under
    /// one lock, so concurrent first opens end up sharing a single handle.
    /// An entry whose last reference is already gone is never revived.
    pub fn alias_or_open_archetype(
        &self,
        dev: DeviceId,
        create: impl FnOnce() -> Result<Arc<dyn Fhandler>, Errno>,
    ) -> Result<Arc<dyn Fhandler>, Errno> {
        let mut archetypes = self.archetypes.lock();
        if let Some(fh) = archetypes.get(&dev).and_then(Weak::upgrade) {
            if fh.base().try_add_ref() {
                return Ok(fh);
            }
        }
        let fh = create()?;
        archetypes.insert(dev, Arc::downgrade(&fh));
        Ok(fh)
    }

    pub fn register_archetype(&self, dev: DeviceId, fh: &Arc<dyn Fhandler>) {
        self.archetypes.lock().insert(dev, Arc::downgrade(fh));
    }

    /// Forget `fh` as the archetype for `dev` after its last close. A newer
    /// archetype registered in the meantime stays.
    pub fn unregister_archetype(&self, dev: DeviceId, fh: &Arc<dyn Fhandler>) {
        let mut archetypes = self.archetypes.lock();
        let same = archetypes
            .get(&dev)
            .is_some_and(|w| std::ptr::addr_eq(w.as_ptr(), Arc::as_ptr(fh)));
        if same {
            archetypes.remove(&dev);
        }
    }

    // -----------------------------------------------------------------------
    // Descriptor table back-reference
    // -----------------------------------------------------------------------

    pub fn attach_table(&self, table: &Arc<DescriptorTable>) {
        *self.fds.lock() = Arc::downgrade(table);
    }

    #[must_use]
    pub fn table(&self) -> Option<Arc<DescriptorTable>> {
        self.fds.lock().upgrade()
    }
}
