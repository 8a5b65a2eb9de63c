//! Listings for the `devices` and `errno-table` commands.

use std::sync::Arc;

use ntposix_core::ProcessContext;
use ntposix_core::config::RuntimeConfig;
use ntposix_core::device;
use ntposix_core::errmap::WIN32_ERRNO_TABLE;
use ntposix_core::flags::O_RDONLY;
use ntposix_core::security::{AllowAll, UserContext};
use ntposix_native::KernelBuilder;
use serde::Serialize;

use crate::error::ScenarioError;

/// Paths listed for the default simulated kernel.
pub const DEVICE_PATHS: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/mem",
    "/dev/kmem",
    "/dev/port",
    "/dev/console",
    "/dev/tty",
    "/dev/ttyS0",
    "/dev/ttyS1",
    "/dev/ptmx",
    "/dev/tty0",
    "/dev/windows",
    "/dev/st0",
    "/dev/nst0",
    "/dev/st1",
    "/dev/fd0",
    "/dev/sda",
    "/dev/sda1",
    "/dev/sda2",
    "/dev/sda3",
    "/dev/sdb",
    "/proc/registry",
    "/proc/sys",
    "/proc/self",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRow {
    pub path: String,
    pub class: &'static str,
    pub major: u32,
    pub minor: u32,
    /// `ok`, or the errno name an open reported.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Open each known path read-only and report what answered.
pub fn list_devices() -> Result<Vec<DeviceRow>, ScenarioError> {
    let kernel = KernelBuilder::simulated().build()?;
    let ctx = ProcessContext::new(
        kernel,
        RuntimeConfig::default(),
        Arc::new(AllowAll),
        UserContext::default(),
    );
    let rows = DEVICE_PATHS
        .iter()
        .filter_map(|path| {
            let parsed = device::parse(path)?;
            let id = parsed.device_id();
            let (status, mode) = match ctx.open(path, O_RDONLY, 0) {
                Ok(fd) => {
                    let mode = ctx.fstat(fd).ok().map(|st| format!("{:o}", st.st_mode));
                    let _ = ctx.close(fd);
                    ("ok".to_owned(), mode)
                }
                Err(e) => (e.name().to_owned(), None),
            };
            Some(DeviceRow {
                path: (*path).to_owned(),
                class: parsed.class().name(),
                major: id.major,
                minor: id.minor,
                status,
                mode,
            })
        })
        .collect();
    ctx.exit();
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrnoRow {
    pub win32: u32,
    pub name: &'static str,
    pub errno: i32,
    pub errno_name: &'static str,
}

#[must_use]
pub fn errno_table() -> Vec<ErrnoRow> {
    WIN32_ERRNO_TABLE
        .iter()
        .map(|(code, name, errno)| ErrnoRow {
            win32: code.0,
            name,
            errno: errno.code(),
            errno_name: errno.name(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_kernel_devices() {
        let rows = list_devices().unwrap();
        let status = |path: &str| {
            rows.iter()
                .find(|r| r.path == path)
                .map(|r| r.status.as_str())
                .unwrap()
        };
        assert_eq!(status("/dev/null"), "ok");
        assert_eq!(status("/dev/sda1"), "ok");
        assert_eq!(status("/dev/sda3"), "ENOENT");
        assert_eq!(status("/dev/sdb"), "ENOENT");
        assert_eq!(status("/dev/st1"), "ENOENT");
        let tty = rows.iter().find(|r| r.path == "/dev/tty").unwrap();
        assert_eq!((tty.class, tty.major, tty.minor), ("console", 5, 1));
        assert_eq!(status("/dev/ttyS0"), "ok");
        assert_eq!(status("/dev/ttyS1"), "ENOENT");
        assert_eq!(status("/dev/ptmx"), "ok");
        // The pty allocated by the ptmx row is gone again.
        assert_eq!(status("/dev/tty0"), "ENOENT");
        let com = rows.iter().find(|r| r.path == "/dev/ttyS0").unwrap();
        assert_eq!((com.class, com.major, com.minor), ("serial", 4, 64));
    }

    #[test]
    fn errno_table_follows_the_native_table() {
        let table = errno_table();
        assert_eq!(table.len(), WIN32_ERRNO_TABLE.len());
        let not_found = table.iter().find(|r| r.name == "FILE_NOT_FOUND").unwrap();
        assert_eq!((not_found.win32, not_found.errno_name), (2, "ENOENT"));
    }
}
