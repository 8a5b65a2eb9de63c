//! Scenario harness for ntposix.
//!
//! This crate provides:
//! - Scenarios: JSON step lists (open, pipe, read, write, fork, ...) with
//!   expected results
//! - A runner that plays a scenario against a fresh simulated kernel
//! - Structured JSONL logging with a line validator
//! - Reports stamped with a SHA-256 digest of their body
//! - Device and error-table listings for the default kernel

#![forbid(unsafe_code)]

pub mod error;
pub mod inventory;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod structured_log;

pub use error::ScenarioError;
pub use report::ScenarioReport;
pub use runner::ScenarioRunner;
pub use scenario::Scenario;
