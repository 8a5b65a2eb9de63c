use std::path::PathBuf;

use ntposix_harness::structured_log::{LogEmitter, validate_log_text};
use ntposix_harness::{Scenario, ScenarioReport, ScenarioRunner};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Run a fixture and check the report and log it produces.
fn run_fixture(name: &str) -> ScenarioReport {
    let scenario = Scenario::from_file(&fixture(name)).unwrap();
    let mut runner = ScenarioRunner::new(&scenario).unwrap();
    let mut log = LogEmitter::to_buffer(&scenario.name);
    let report = runner.run(&scenario, &mut log).unwrap();

    let text = String::from_utf8(log.into_inner()).unwrap();
    let (lines, errors) = validate_log_text(&text);
    assert!(errors.is_empty(), "{errors:?}");
    // One record per step plus start and end.
    assert_eq!(lines, scenario.steps.len() + 2);
    assert!(report.digest_matches());
    report
}

fn assert_passed(report: &ScenarioReport) {
    let failures: Vec<_> = report
        .steps
        .iter()
        .filter(|s| !s.passed)
        .map(|s| format!("step {} {}: {:?}", s.index, s.op, s.mismatch))
        .collect();
    assert!(failures.is_empty(), "{failures:#?}");
}

#[test]
fn pipe_basics_fixture_passes() {
    let report = run_fixture("pipe_basics.json");
    assert_passed(&report);
    assert_eq!(report.total, 13);
}

#[test]
fn fork_exec_fixture_passes() {
    assert_passed(&run_fixture("fork_exec.json"));
}

#[test]
fn console_fixture_passes() {
    assert_passed(&run_fixture("console_tty.json"));
}

#[test]
fn tape_fixture_passes() {
    assert_passed(&run_fixture("tape_roundtrip.json"));
}

#[test]
fn digests_depend_on_results() {
    let a = run_fixture("pipe_basics.json");
    let b = run_fixture("pipe_basics.json");
    assert_eq!(a.sha256, b.sha256);

    let scenario = Scenario::from_json(
        r#"{"name":"pipe_basics","steps":[{"op":"close","fd":0,"expect":{"ret":0}}]}"#,
    )
    .unwrap();
    let mut runner = ScenarioRunner::new(&scenario).unwrap();
    let c = runner.run(&scenario, &mut LogEmitter::discard()).unwrap();
    assert_eq!(c.failed, 1);
    assert_ne!(c.sha256, a.sha256);
}

#[test]
fn config_overrides_reach_the_process() {
    let scenario = Scenario::from_json(
        r#"{"name":"small","config":{"open_max":2},"steps":[
            {"op":"open","path":"/dev/null","flags":"O_RDONLY"},
            {"op":"open","path":"/dev/null","flags":"O_RDONLY"},
            {"op":"open","path":"/dev/null","flags":"O_RDONLY","expect":{"errno":"EMFILE"}}
        ]}"#,
    )
    .unwrap();
    let mut runner = ScenarioRunner::new(&scenario).unwrap();
    let report = runner.run(&scenario, &mut LogEmitter::discard()).unwrap();
    assert_passed(&report);
}
