//! Run report artifact and transcript rendering.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ctgate_core::HarnessError;
use serde::{Deserialize, Serialize};

use crate::check::CheckKind;
use crate::gate::GateVerdict;
use crate::runner::CheckResult;

pub const REPORT_SCHEMA_VERSION: &str = "1";

pub const PASS_MARK: &str = "✓";
pub const FAIL_MARK: &str = "✗";

/// Why a run stopped early.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureSummary {
    pub check: CheckKind,
    pub kind: String,
    pub message: String,
    pub exit_code: u8,
}

impl FailureSummary {
    pub fn new(check: CheckKind, error: &HarnessError) -> Self {
        Self {
            check,
            kind: error.kind().to_string(),
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }
}

/// Everything observed during one harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub schema_version: String,
    pub run_id: String,
    pub image: String,
    pub container_name: String,
    pub config_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checks: Vec<CheckResult>,
    pub verdict: GateVerdict,
    pub failure: Option<FailureSummary>,
}

impl RunReport {
    /// Every check passed and the gate agrees.
    pub fn success(&self) -> bool {
        self.failure.is_none() && self.verdict.passed
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        match &self.failure {
            Some(failure) => failure.exit_code,
            None if self.verdict.passed => 0,
            None => 1,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

/// One transcript line: `✓ health: GET /health -> HTTP 200`.
pub fn render_transcript_line(result: &CheckResult) -> String {
    let mark = if result.passed { PASS_MARK } else { FAIL_MARK };
    format!(
        "{} [{:02}] {}: {} ({}ms)",
        mark,
        result.check.ordinal(),
        result.check.name(),
        result.detail,
        result.duration_ms
    )
}

/// Closing banner of the transcript.
pub fn render_banner(report: &RunReport) -> String {
    if report.success() {
        format!(
            "{} All {} checks passed for {} ({}ms)",
            PASS_MARK,
            report.passed_count(),
            report.image,
            report.duration_ms
        )
    } else {
        let failed_at = report
            .failure
            .as_ref()
            .map(|f| format!("{} ({})", f.check, f.kind))
            .unwrap_or_else(|| "gate".to_string());
        format!(
            "{} {} failed at {}: {}/{} checks passed",
            FAIL_MARK,
            report.image,
            failed_at,
            report.passed_count(),
            CheckKind::ALL.len()
        )
    }
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::HarnessGate;

    fn report(checks: Vec<CheckResult>, failure: Option<FailureSummary>) -> RunReport {
        let verdict = HarnessGate::evaluate(&checks);
        RunReport {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: "run-1".to_string(),
            image: "demo:v1.0.0".to_string(),
            container_name: "demo-test".to_string(),
            config_digest: "abc".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 42,
            checks,
            verdict,
            failure,
        }
    }

    #[test]
    fn test_transcript_line_marks() {
        let ok = CheckResult::pass(CheckKind::Health, 3, "GET /health -> HTTP 200");
        assert_eq!(
            render_transcript_line(&ok),
            "✓ [04] health: GET /health -> HTTP 200 (3ms)"
        );

        let err = HarnessError::Identity {
            expected: "appuser".into(),
            actual: "root".into(),
        };
        let bad = CheckResult::fail(CheckKind::RuntimeIdentity, 1, &err);
        assert!(render_transcript_line(&bad).starts_with("✗ [03] runtime_identity: "));
    }

    #[test]
    fn test_successful_report() {
        let checks: Vec<CheckResult> = CheckKind::ALL
            .iter()
            .map(|c| CheckResult::pass(*c, 1, "ok"))
            .collect();
        let r = report(checks, None);
        assert!(r.success());
        assert_eq!(r.exit_code(), 0);
        assert!(render_banner(&r).starts_with("✓ All 12 checks passed"));
    }

    #[test]
    fn test_failed_report_banner_and_exit_code() {
        let err = HarnessError::ImageMissing {
            image: "demo:v1.0.0".into(),
            fix: "docker build -t demo:v1.0.0 .".into(),
        };
        let checks = vec![CheckResult::fail(CheckKind::ImagePresent, 0, &err)];
        let r = report(checks, Some(FailureSummary::new(CheckKind::ImagePresent, &err)));
        assert!(!r.success());
        assert_eq!(r.exit_code(), 2);
        assert_eq!(r.failed_count(), 1);
        assert!(render_banner(&r).contains("failed at image_present (precondition)"));
    }
}
