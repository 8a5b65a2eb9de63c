//! Runtime configuration.
//!
//! Values come from the environment on first use and are cached for the
//! life of the process:
//! - `NTPOSIX_PIPE_BUFSIZE`: pipe quota in bytes (`k`/`m` suffixes accepted),
//!   never below `PIPE_BUF`.
//! - `NTPOSIX_RETRY_LIMIT`: attempts per device operation when the device
//!   reports a media change or bus reset.
//! - `NTPOSIX_WAIT_SLICE_MS`: how long a blocking call parks before it
//!   re-checks its condition and the signal state.
//! - `NTPOSIX_OPEN_MAX`: descriptor table size.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Writes up to this size are atomic on pipes.
pub const PIPE_BUF: usize = 4096;

pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 65536;
pub const DEFAULT_RETRY_LIMIT: u32 = 5;
pub const DEFAULT_WAIT_SLICE_MS: u64 = 10;
pub const DEFAULT_OPEN_MAX: usize = 3200;
pub const DEFAULT_TAPE_BLOCK_SIZE: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub pipe_buffer_size: usize,
    pub device_retry_limit: u32,
    pub wait_slice_ms: u64,
    pub open_max: usize,
    pub tape_default_block_size: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            device_retry_limit: DEFAULT_RETRY_LIMIT,
            wait_slice_ms: DEFAULT_WAIT_SLICE_MS,
            open_max: DEFAULT_OPEN_MAX,
            tape_default_block_size: DEFAULT_TAPE_BLOCK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Build from an environment lookup, falling back to defaults for
    /// missing or unparsable values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(size) = lookup("NTPOSIX_PIPE_BUFSIZE").and_then(|v| parse_size_loose(&v)) {
            config.pipe_buffer_size = size;
        }
        if let Some(limit) = lookup("NTPOSIX_RETRY_LIMIT").and_then(|v| v.trim().parse().ok()) {
            config.device_retry_limit = limit;
        }
        if let Some(ms) = lookup("NTPOSIX_WAIT_SLICE_MS").and_then(|v| v.trim().parse().ok()) {
            config.wait_slice_ms = ms;
        }
        if let Some(max) = lookup("NTPOSIX_OPEN_MAX").and_then(|v| parse_size_loose(&v)) {
            config.open_max = max;
        }
        config.normalized()
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Clamp every field into its legal range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.pipe_buffer_size = self.pipe_buffer_size.max(PIPE_BUF);
        self.device_retry_limit = self.device_retry_limit.max(1);
        self.wait_slice_ms = self.wait_slice_ms.clamp(1, 1000);
        self.open_max = self.open_max.clamp(1, 1 << 16);
        if self.tape_default_block_size == 0 {
            self.tape_default_block_size = DEFAULT_TAPE_BLOCK_SIZE;
        }
        self
    }

    #[must_use]
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

/// Parse a byte count with an optional `k`/`m`/`g` suffix (case-insensitive).
#[must_use]
pub fn parse_size_loose(s: &str) -> Option<usize> {
    let s = s.trim().to_ascii_lowercase();
    let (digits, shift) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 10),
        'm' => (&s[..s.len() - 1], 20),
        'g' => (&s[..s.len() - 1], 30),
        _ => (s.as_str(), 0),
    };
    let value: usize = digits.trim().parse().ok()?;
    value.checked_mul(1usize << shift)
}

static PROCESS_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// The configuration resolved from the environment (read once, then cached).
#[must_use]
pub fn runtime_config() -> &'static RuntimeConfig {
    PROCESS_CONFIG.get_or_init(RuntimeConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size_loose("64k"), Some(65536));
        assert_eq!(parse_size_loose(" 1M "), Some(1 << 20));
        assert_eq!(parse_size_loose("4096"), Some(4096));
        assert_eq!(parse_size_loose("lots"), None);
        assert_eq!(parse_size_loose(""), None);
    }

    #[test]
    fn env_values_are_clamped() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("NTPOSIX_PIPE_BUFSIZE", "100"),
            ("NTPOSIX_RETRY_LIMIT", "0"),
            ("NTPOSIX_WAIT_SLICE_MS", "25"),
        ]));
        assert_eq!(config.pipe_buffer_size, PIPE_BUF);
        assert_eq!(config.device_retry_limit, 1);
        assert_eq!(config.wait_slice(), Duration::from_millis(25));
        assert_eq!(config.open_max, DEFAULT_OPEN_MAX);
    }

    #[test]
    fn small_open_max_is_kept() {
        let config = RuntimeConfig::from_lookup(lookup(&[("NTPOSIX_OPEN_MAX", "2")]));
        assert_eq!(config.open_max, 2);
        let config = RuntimeConfig::from_lookup(lookup(&[("NTPOSIX_OPEN_MAX", "0")]));
        assert_eq!(config.open_max, 1);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[("NTPOSIX_RETRY_LIMIT", "many")]));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"pipe_buffer_size": 8192}"#).unwrap();
        assert_eq!(config.pipe_buffer_size, 8192);
        assert_eq!(config.device_retry_limit, DEFAULT_RETRY_LIMIT);
    }
}
