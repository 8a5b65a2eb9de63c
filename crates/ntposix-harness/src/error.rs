//! Harness failures (as opposed to steps whose result differs from the
//! expectation, which are recorded in the report).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("step {step}: unknown flag '{flag}'")]
    UnknownFlag { step: usize, flag: String },
    #[error("step {step}: unknown ioctl '{name}'")]
    UnknownIoctl { step: usize, name: String },
    #[error("step {step}: no descriptor bound to '{name}'")]
    UnboundName { step: usize, name: String },
    #[error("step {step}: no process named '{name}'")]
    UnknownProcess { step: usize, name: String },
    #[error("step {step}: {op} binds {expected} name(s), got {got}")]
    BindArity {
        step: usize,
        op: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("kernel: {0}")]
    Kernel(#[from] ntposix_native::NtStatus),
}
