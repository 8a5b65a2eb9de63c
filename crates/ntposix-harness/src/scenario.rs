//! Scenario files.
//!
//! A scenario is a list of steps run in order against one simulated kernel.
//! Each step names an operation, optionally the process it runs in (default
//! `main`), the names its results are bound to, and what it should return:
//!
//! ```json
//! {"op": "pipe", "bind": ["r", "w"]}
//! {"op": "write", "fd": "w", "data": "hello", "expect": {"ret": 5}}
//! {"op": "open", "path": "/nope", "flags": "O_RDONLY", "expect": {"errno": "ENOENT"}}
//! ```

use std::path::Path;

use ntposix_core::config::RuntimeConfig;
use ntposix_core::flags::{
    O_APPEND, O_CLOEXEC, O_CREAT, O_DIRECTORY, O_EXCL, O_NOCTTY, O_NONBLOCK, O_RDONLY, O_RDWR,
    O_TRUNC, O_WRONLY, SEEK_CUR, SEEK_END, SEEK_SET,
};
use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;

pub const MAIN_PROCESS: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides applied on top of the default runtime configuration.
    #[serde(default)]
    pub config: RuntimeConfig,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub op: Op,
    #[serde(default = "main_process")]
    pub process: String,
    #[serde(default)]
    pub bind: Vec<String>,
    #[serde(default)]
    pub expect: Option<Expect>,
}

fn main_process() -> String {
    MAIN_PROCESS.to_owned()
}

/// A descriptor given literally or by a name bound in an earlier step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FdRef {
    Num(i32),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Open {
        path: String,
        #[serde(default)]
        flags: String,
        #[serde(default)]
        mode: u32,
    },
    Pipe {
        #[serde(default)]
        flags: String,
    },
    Write {
        fd: FdRef,
        data: String,
    },
    Read {
        fd: FdRef,
        len: usize,
    },
    Lseek {
        fd: FdRef,
        offset: i64,
        whence: String,
    },
    /// `cmd` is `FIONREAD`, `FIONBIO`, `TCFLSH`, or a tape operation name
    /// (`MTREW`, `MTFSF`, ...) sent through `MTIOCTOP` with `arg` as count.
    Ioctl {
        fd: FdRef,
        cmd: String,
        #[serde(default)]
        arg: i64,
    },
    Dup {
        fd: FdRef,
    },
    Dup2 {
        fd: FdRef,
        target: FdRef,
    },
    Close {
        fd: FdRef,
    },
    /// Binds the child's process name.
    Fork,
    Exec {
        exename: String,
        #[serde(default)]
        argv: Vec<String>,
    },
    Exit,
    /// Keystrokes for the console's input queue.
    ConsoleInput {
        data: String,
    },
}

impl Op {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Pipe { .. } => "pipe",
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::Lseek { .. } => "lseek",
            Self::Ioctl { .. } => "ioctl",
            Self::Dup { .. } => "dup",
            Self::Dup2 { .. } => "dup2",
            Self::Close { .. } => "close",
            Self::Fork => "fork",
            Self::Exec { .. } => "exec",
            Self::Exit => "exit",
            Self::ConsoleInput { .. } => "console_input",
        }
    }
}

/// Every operation name a scenario (and a log line) may carry.
pub const OP_NAMES: &[&str] = &[
    "open",
    "pipe",
    "write",
    "read",
    "lseek",
    "ioctl",
    "dup",
    "dup2",
    "close",
    "fork",
    "exec",
    "exit",
    "console_input",
];

/// Expected result. Absent fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret: Option<i64>,
    /// Error name such as `EAGAIN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
    /// Bytes a read returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

// ---------------------------------------------------------------------------
// Symbolic arguments
// ---------------------------------------------------------------------------

const OPEN_FLAGS: &[(&str, i32)] = &[
    ("O_RDONLY", O_RDONLY),
    ("O_WRONLY", O_WRONLY),
    ("O_RDWR", O_RDWR),
    ("O_CREAT", O_CREAT),
    ("O_EXCL", O_EXCL),
    ("O_NOCTTY", O_NOCTTY),
    ("O_TRUNC", O_TRUNC),
    ("O_APPEND", O_APPEND),
    ("O_NONBLOCK", O_NONBLOCK),
    ("O_DIRECTORY", O_DIRECTORY),
    ("O_CLOEXEC", O_CLOEXEC),
];

/// Parse `"O_RDWR|O_NONBLOCK"`. Numbers are accepted as-is; empty is 0.
/// On failure returns the offending token.
pub fn parse_flags(text: &str) -> Result<i32, String> {
    let mut flags = 0;
    for token in text.split('|').map(str::trim).filter(|t| !t.is_empty()) {
        if let Ok(value) = token.parse::<i32>() {
            flags |= value;
            continue;
        }
        match OPEN_FLAGS.iter().find(|(name, _)| *name == token) {
            Some((_, value)) => flags |= value,
            None => return Err(token.to_owned()),
        }
    }
    Ok(flags)
}

pub fn parse_whence(text: &str) -> Option<i32> {
    match text {
        "SEEK_SET" => Some(SEEK_SET),
        "SEEK_CUR" => Some(SEEK_CUR),
        "SEEK_END" => Some(SEEK_END),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_symbolically() {
        assert_eq!(parse_flags(""), Ok(0));
        assert_eq!(parse_flags("O_RDWR | O_NONBLOCK"), Ok(O_RDWR | O_NONBLOCK));
        assert_eq!(parse_flags("2"), Ok(O_RDWR));
        assert_eq!(parse_flags("O_RDWR|O_BOGUS"), Err("O_BOGUS".to_owned()));
    }

    #[test]
    fn steps_default_to_the_main_process() {
        let scenario = Scenario::from_json(
            r#"{"name":"t","steps":[
                {"op":"pipe","bind":["r","w"]},
                {"op":"read","fd":"r","len":4,"process":"kid","expect":{"errno":"EAGAIN"}},
                {"op":"close","fd":3}
            ]}"#,
        )
        .unwrap();
        assert_eq!(scenario.steps[0].process, MAIN_PROCESS);
        assert_eq!(scenario.steps[1].process, "kid");
        assert!(matches!(scenario.steps[1].op, Op::Read { len: 4, .. }));
        assert!(matches!(scenario.steps[2].op, Op::Close { fd: FdRef::Num(3) }));
        assert_eq!(
            scenario.steps[1].expect.as_ref().unwrap().errno.as_deref(),
            Some("EAGAIN")
        );
        assert_eq!(scenario.config, RuntimeConfig::default());
    }

    #[test]
    fn op_names_cover_every_variant() {
        let ops = [
            Op::Fork,
            Op::Exit,
            Op::ConsoleInput {
                data: String::new(),
            },
        ];
        for op in ops {
            assert!(OP_NAMES.contains(&op.name()));
        }
    }
}
