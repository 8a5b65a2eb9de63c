//! Scenario execution.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use ntposix_core::ProcessContext;
use ntposix_core::errno::Errno;
use ntposix_core::ioctl::{FIONBIO, FIONREAD, IoctlArg, MTIOCTOP, MtOp, TCFLSH};
use ntposix_core::ioctl::{
    MTBSF, MTBSR, MTEOM, MTERASE, MTFSF, MTFSR, MTLOAD, MTNOP, MTOFFL, MTREW, MTRETEN, MTUNLOAD,
    MTWEOF,
};
use ntposix_core::security::{AllowAll, UserContext};
use ntposix_native::{Kernel, KernelBuilder};

use crate::error::ScenarioError;
use crate::report::{ScenarioReport, StepResult};
use crate::scenario::{Expect, FdRef, MAIN_PROCESS, Op, Scenario, Step, parse_flags, parse_whence};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

const TAPE_OPS: &[(&str, i16)] = &[
    ("MTFSF", MTFSF),
    ("MTBSF", MTBSF),
    ("MTFSR", MTFSR),
    ("MTBSR", MTBSR),
    ("MTWEOF", MTWEOF),
    ("MTREW", MTREW),
    ("MTOFFL", MTOFFL),
    ("MTNOP", MTNOP),
    ("MTRETEN", MTRETEN),
    ("MTEOM", MTEOM),
    ("MTERASE", MTERASE),
    ("MTLOAD", MTLOAD),
    ("MTUNLOAD", MTUNLOAD),
];

/// What a step produced before it is compared with its expectation.
#[derive(Debug, Default)]
struct Produced {
    ret: i64,
    data: Option<String>,
}

/// Plays scenarios against one simulated kernel.
pub struct ScenarioRunner {
    kernel: Arc<Kernel>,
    processes: BTreeMap<String, ProcessContext>,
    names: HashMap<String, i32>,
}

impl ScenarioRunner {
    /// A fresh kernel with the default simulated devices and one `main`
    /// process configured by `scenario`.
    pub fn new(scenario: &Scenario) -> Result<Self, ScenarioError> {
        let kernel = KernelBuilder::simulated().build()?;
        let main = ProcessContext::new(
            Arc::clone(&kernel),
            scenario.config.clone(),
            Arc::new(AllowAll),
            UserContext::default(),
        );
        let mut processes = BTreeMap::new();
        processes.insert(MAIN_PROCESS.to_owned(), main);
        Ok(Self {
            kernel,
            processes,
            names: HashMap::new(),
        })
    }

    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    #[must_use]
    pub fn process(&self, name: &str) -> Option<&ProcessContext> {
        self.processes.get(name)
    }

    /// Run every step, logging one record per step. Steps whose result
    /// differs from the expectation are failures in the report; malformed
    /// steps abort the run.
    pub fn run<W: Write>(
        &mut self,
        scenario: &Scenario,
        log: &mut LogEmitter<W>,
    ) -> Result<ScenarioReport, ScenarioError> {
        log::info!("scenario {}: {} steps", scenario.name, scenario.steps.len());
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "scenario_start").with_scenario(&scenario.name),
        )?;

        let mut results = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            let pid = self.context(index, &step.process)?.pid();
            let start = Instant::now();
            let produced = self.execute(index, step)?;
            let latency = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

            let result = judge(index, step, produced);
            log::debug!(
                "step {index} {} in {}: passed={}",
                step.op.name(),
                step.process,
                result.passed
            );
            log.emit_entry(step_entry(scenario, step, &result, pid, latency))?;
            results.push(result);
        }

        let report = ScenarioReport::from_steps(&scenario.name, results);
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "scenario_end")
                .with_scenario(&scenario.name)
                .with_outcome(if report.all_passed() {
                    Outcome::Pass
                } else {
                    Outcome::Fail
                })
                .with_details(serde_json::json!({
                    "passed": report.passed,
                    "failed": report.failed,
                    "sha256": report.sha256,
                })),
        )?;
        log.flush()?;
        Ok(report)
    }

    fn context(&self, step: usize, name: &str) -> Result<&ProcessContext, ScenarioError> {
        self.processes
            .get(name)
            .ok_or_else(|| ScenarioError::UnknownProcess {
                step,
                name: name.to_owned(),
            })
    }

    fn fd(&self, step: usize, fd: &FdRef) -> Result<i32, ScenarioError> {
        match fd {
            FdRef::Num(n) => Ok(*n),
            FdRef::Name(name) => {
                self.names
                    .get(name)
                    .copied()
                    .ok_or_else(|| ScenarioError::UnboundName {
                        step,
                        name: name.clone(),
                    })
            }
        }
    }

    fn bind(&mut self, index: usize, step: &Step, values: &[i32]) -> Result<(), ScenarioError> {
        if step.bind.is_empty() {
            return Ok(());
        }
        if step.bind.len() != values.len() {
            return Err(ScenarioError::BindArity {
                step: index,
                op: step.op.name(),
                expected: values.len(),
                got: step.bind.len(),
            });
        }
        for (name, value) in step.bind.iter().zip(values) {
            self.names.insert(name.clone(), *value);
        }
        Ok(())
    }

    fn flags(index: usize, text: &str) -> Result<i32, ScenarioError> {
        parse_flags(text).map_err(|flag| ScenarioError::UnknownFlag { step: index, flag })
    }

    /// Outer `Err` is a malformed step; inner `Err` is the call's errno.
    fn execute(
        &mut self,
        index: usize,
        step: &Step,
    ) -> Result<Result<Produced, Errno>, ScenarioError> {
        let ctx = self.context(index, &step.process)?;
        let ret = |r: Result<i32, Errno>| {
            r.map(|v| Produced {
                ret: i64::from(v),
                data: None,
            })
        };
        let outcome = match &step.op {
            Op::Open { path, flags, mode } => {
                let r = ctx.open(path, Self::flags(index, flags)?, *mode);
                if let Ok(fd) = r {
                    self.bind(index, step, &[fd])?;
                }
                ret(r)
            }
            Op::Pipe { flags } => match ctx.pipe(Self::flags(index, flags)?) {
                Ok([r, w]) => {
                    self.bind(index, step, &[r, w])?;
                    Ok(Produced::default())
                }
                Err(e) => Err(e),
            },
            Op::Write { fd, data } => {
                let fd = self.fd(index, fd)?;
                ctx.write(fd, data.as_bytes()).map(|n| Produced {
                    ret: n as i64,
                    data: None,
                })
            }
            Op::Read { fd, len } => {
                let fd = self.fd(index, fd)?;
                let mut buf = vec![0u8; *len];
                ctx.read(fd, &mut buf).map(|n| Produced {
                    ret: n as i64,
                    data: Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
                })
            }
            Op::Lseek { fd, offset, whence } => {
                let fd = self.fd(index, fd)?;
                // An unparsable whence reaches the call as an invalid value.
                let whence = parse_whence(whence).unwrap_or(-1);
                ctx.lseek(fd, *offset, whence).map(|pos| Produced {
                    ret: i64::try_from(pos).unwrap_or(i64::MAX),
                    data: None,
                })
            }
            Op::Ioctl { fd, cmd, arg } => {
                let fd = self.fd(index, fd)?;
                Self::ioctl(index, ctx, fd, cmd, *arg)?
            }
            Op::Dup { fd } => {
                let fd = self.fd(index, fd)?;
                let r = ctx.dup(fd);
                if let Ok(new) = r {
                    self.bind(index, step, &[new])?;
                }
                ret(r)
            }
            Op::Dup2 { fd, target } => {
                let (fd, target) = (self.fd(index, fd)?, self.fd(index, target)?);
                ret(ctx.dup2(fd, target))
            }
            Op::Close { fd } => {
                let fd = self.fd(index, fd)?;
                ctx.close(fd).map(|()| Produced::default())
            }
            Op::Fork => {
                let name = match step.bind.as_slice() {
                    [name] => name.clone(),
                    other => {
                        return Err(ScenarioError::BindArity {
                            step: index,
                            op: "fork",
                            expected: 1,
                            got: other.len(),
                        });
                    }
                };
                match ctx.fork() {
                    Ok(child) => {
                        let pid = child.pid();
                        self.processes.insert(name, child);
                        Ok(Produced {
                            ret: i64::from(pid),
                            data: None,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Op::Exec { exename, argv } => {
                ctx.exec(exename, argv);
                Ok(Produced::default())
            }
            Op::Exit => {
                ctx.exit();
                self.processes.remove(&step.process);
                Ok(Produced::default())
            }
            Op::ConsoleInput { data } => {
                self.kernel.console().push_input(data.as_bytes());
                Ok(Produced {
                    ret: data.len() as i64,
                    data: None,
                })
            }
        };
        Ok(outcome)
    }

    fn ioctl(
        index: usize,
        ctx: &ProcessContext,
        fd: i32,
        cmd: &str,
        arg: i64,
    ) -> Result<Result<Produced, Errno>, ScenarioError> {
        let produced = |r: Result<i64, Errno>| r.map(|ret| Produced { ret, data: None });
        let outcome = match cmd {
            "FIONREAD" => {
                let mut avail = 0i64;
                ctx.ioctl(fd, FIONREAD, IoctlArg::IntOut(&mut avail))
                    .map(|_| Produced {
                        ret: avail,
                        data: None,
                    })
            }
            "FIONBIO" => produced(ctx.ioctl(fd, FIONBIO, IoctlArg::Int(arg))),
            "TCFLSH" => produced(ctx.ioctl(fd, TCFLSH, IoctlArg::Int(arg))),
            name => {
                let Some((_, op)) = TAPE_OPS.iter().find(|(n, _)| *n == name) else {
                    return Err(ScenarioError::UnknownIoctl {
                        step: index,
                        name: name.to_owned(),
                    });
                };
                let mut mtop = MtOp {
                    mt_op: *op,
                    mt_count: i32::try_from(arg).unwrap_or(i32::MAX),
                };
                produced(ctx.ioctl(fd, MTIOCTOP, IoctlArg::Mtop(&mut mtop)))
            }
        };
        Ok(outcome)
    }
}

fn judge(index: usize, step: &Step, produced: Result<Produced, Errno>) -> StepResult {
    let (ret, errno, data) = match produced {
        Ok(p) => (Some(p.ret), None, p.data),
        Err(e) => (None, Some(e.name().to_owned()), None),
    };
    let mismatch = step
        .expect
        .as_ref()
        .and_then(|expect| mismatch(expect, ret, errno.as_deref(), data.as_deref()));
    StepResult {
        index,
        op: step.op.name().to_owned(),
        process: step.process.clone(),
        passed: mismatch.is_none(),
        ret,
        errno,
        data,
        mismatch,
    }
}

fn mismatch(
    expect: &Expect,
    ret: Option<i64>,
    errno: Option<&str>,
    data: Option<&str>,
) -> Option<String> {
    if let Some(want) = &expect.errno
        && errno != Some(want.as_str())
    {
        return Some(match errno {
            Some(got) => format!("errno {got}, expected {want}"),
            None => format!("succeeded, expected {want}"),
        });
    }
    if expect.errno.is_none()
        && let Some(got) = errno
    {
        return Some(format!("failed with {got}"));
    }
    if let Some(want) = expect.ret
        && ret != Some(want)
    {
        return Some(format!("ret {ret:?}, expected {want}"));
    }
    if let Some(want) = &expect.data
        && data != Some(want.as_str())
    {
        return Some(format!("data {data:?}, expected {want:?}"));
    }
    None
}

fn step_entry(
    scenario: &Scenario,
    step: &Step,
    result: &StepResult,
    pid: u32,
    latency_ns: u64,
) -> LogEntry {
    let level = if result.passed {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let mut entry = LogEntry::new("", level, "step")
        .with_scenario(&scenario.name)
        .with_step(result.index, step.op.name())
        .with_process(&step.process, pid)
        .with_latency_ns(latency_ns)
        .with_outcome(if result.passed {
            Outcome::Pass
        } else {
            Outcome::Fail
        });
    if let Some(ret) = result.ret {
        entry = entry.with_ret(ret);
    }
    if let Some(code) = result.errno.as_deref().and_then(errno_code) {
        entry = entry.with_errno(code);
    }
    if let Some(mismatch) = &result.mismatch {
        entry = entry.with_details(serde_json::json!({ "mismatch": mismatch }));
    }
    match &step.op {
        Op::Write { fd: FdRef::Num(fd), .. }
        | Op::Read { fd: FdRef::Num(fd), .. }
        | Op::Close { fd: FdRef::Num(fd) } => entry.with_fd(*fd),
        _ => entry,
    }
}

fn errno_code(name: &str) -> Option<i32> {
    if name == "EUNKNOWN" {
        return None;
    }
    (1..=200).find(|code| Errno(*code).name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(json: &str) -> ScenarioReport {
        let scenario = Scenario::from_json(json).unwrap();
        let mut runner = ScenarioRunner::new(&scenario).unwrap();
        runner.run(&scenario, &mut LogEmitter::discard()).unwrap()
    }

    #[test]
    fn pipe_steps_bind_names() {
        let report = run(r#"{"name":"p","steps":[
            {"op":"pipe","bind":["r","w"]},
            {"op":"write","fd":"w","data":"hi","expect":{"ret":2}},
            {"op":"read","fd":"r","len":8,"expect":{"ret":2,"data":"hi"}}
        ]}"#);
        assert!(report.all_passed(), "{report:?}");
    }

    #[test]
    fn mismatches_are_failures_not_errors() {
        let report = run(r#"{"name":"m","steps":[
            {"op":"close","fd":7,"expect":{"ret":0}},
            {"op":"close","fd":7,"expect":{"errno":"EBADF"}},
            {"op":"open","path":"/dev/null","flags":"O_RDONLY","expect":{"errno":"ENOENT"}}
        ]}"#);
        assert_eq!(report.failed, 2);
        assert_eq!(report.steps[0].mismatch.as_deref(), Some("failed with EBADF"));
        assert!(report.steps[1].passed);
        assert_eq!(
            report.steps[2].mismatch.as_deref(),
            Some("succeeded, expected ENOENT")
        );
    }

    #[test]
    fn malformed_steps_abort() {
        let scenario = Scenario::from_json(
            r#"{"name":"bad","steps":[{"op":"read","fd":"nobody","len":1}]}"#,
        )
        .unwrap();
        let mut runner = ScenarioRunner::new(&scenario).unwrap();
        let err = runner.run(&scenario, &mut LogEmitter::discard()).unwrap_err();
        assert!(matches!(err, ScenarioError::UnboundName { step: 0, .. }));

        let scenario = Scenario::from_json(
            r#"{"name":"bad","steps":[{"op":"open","path":"/dev/null","flags":"O_WHAT"}]}"#,
        )
        .unwrap();
        let mut runner = ScenarioRunner::new(&scenario).unwrap();
        let err = runner.run(&scenario, &mut LogEmitter::discard()).unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownFlag { .. }));
    }

    #[test]
    fn errno_names_map_back_to_codes() {
        assert_eq!(errno_code("EBADF"), Some(9));
        assert_eq!(errno_code("ENOMEDIUM"), Some(123));
        assert_eq!(errno_code("EUNKNOWN"), None);
    }
}
