//! The process context behind every `ntp_*` call.

use std::sync::{Arc, OnceLock};

use ntposix_core::ProcessContext;
use ntposix_core::config::runtime_config;
use ntposix_core::errmap::nt_to_errno;
use ntposix_core::errno::Errno;
use ntposix_core::security::{AllowAll, UserContext};
use ntposix_native::kernel::KernelBuilder;

static CONTEXT: OnceLock<Result<ProcessContext, Errno>> = OnceLock::new();

fn boot() -> Result<ProcessContext, Errno> {
    let kernel = KernelBuilder::simulated().build().map_err(nt_to_errno)?;
    let context = ProcessContext::new(
        kernel,
        runtime_config().clone(),
        Arc::new(AllowAll),
        UserContext::default(),
    );
    log::debug!("ntposix-abi: process {} ready", context.pid());
    Ok(context)
}

/// The library's process, created on first call.
pub fn context() -> Result<&'static ProcessContext, Errno> {
    match CONTEXT.get_or_init(boot) {
        Ok(context) => Ok(context),
        Err(e) => Err(*e),
    }
}
