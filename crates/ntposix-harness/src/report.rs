//! Scenario reports.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub op: String,
    pub process: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Why the step failed its expectation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
}

/// Report for one scenario run. `sha256` covers every other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub steps: Vec<StepResult>,
    pub sha256: String,
}

#[derive(Serialize)]
struct ReportBody<'a> {
    scenario: &'a str,
    total: usize,
    passed: usize,
    failed: usize,
    steps: &'a [StepResult],
}

impl ScenarioReport {
    #[must_use]
    pub fn from_steps(scenario: impl Into<String>, steps: Vec<StepResult>) -> Self {
        let total = steps.len();
        let passed = steps.iter().filter(|s| s.passed).count();
        let mut report = Self {
            scenario: scenario.into(),
            total,
            passed,
            failed: total - passed,
            steps,
            sha256: String::new(),
        };
        report.sha256 = report.digest();
        report
    }

    /// Hex SHA-256 of the canonical JSON body.
    #[must_use]
    pub fn digest(&self) -> String {
        let body = ReportBody {
            scenario: &self.scenario,
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            steps: &self.steps,
        };
        // Plain data; serializing it cannot fail.
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        hex_lower(&Sha256::digest(&bytes))
    }

    /// Whether the stored digest matches the body.
    #[must_use]
    pub fn digest_matches(&self) -> bool {
        self.sha256 == self.digest()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.scenario);
        out.push_str(&format!(
            "- Total: {}\n- Passed: {}\n- Failed: {}\n- SHA-256: `{}`\n\n",
            self.total, self.passed, self.failed, self.sha256
        ));
        out.push_str("| # | Process | Op | Result | Status |\n");
        out.push_str("|---|---------|----|--------|--------|\n");
        for s in &self.steps {
            let result = match (&s.errno, s.ret) {
                (Some(errno), _) => errno.clone(),
                (None, Some(ret)) => ret.to_string(),
                (None, None) => "-".to_owned(),
            };
            let status = if s.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                s.index, s.process, s.op, result, status
            ));
        }
        out
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: usize, passed: bool) -> StepResult {
        StepResult {
            index,
            op: "read".into(),
            process: "main".into(),
            passed,
            ret: Some(5),
            errno: None,
            data: Some("hello".into()),
            mismatch: (!passed).then(|| "ret 5, expected 4".into()),
        }
    }

    #[test]
    fn counts_and_digest() {
        let report = ScenarioReport::from_steps("s", vec![step(0, true), step(1, false)]);
        assert_eq!((report.total, report.passed, report.failed), (2, 1, 1));
        assert!(!report.all_passed());
        assert_eq!(report.sha256.len(), 64);
        assert!(report.digest_matches());
    }

    #[test]
    fn tampering_breaks_the_digest() {
        let json = ScenarioReport::from_steps("s", vec![step(0, false)]).to_json();
        let mut parsed: ScenarioReport = serde_json::from_str(&json).unwrap();
        assert!(parsed.digest_matches());
        parsed.steps[0].passed = true;
        assert!(!parsed.digest_matches());
    }

    #[test]
    fn markdown_lists_every_step() {
        let md = ScenarioReport::from_steps("pipes", vec![step(0, true), step(1, false)])
            .to_markdown();
        assert!(md.starts_with("# pipes\n"));
        assert!(md.contains("| 0 | main | read | 5 | PASS |"));
        assert!(md.contains("| 1 | main | read | 5 | FAIL |"));
    }
}
