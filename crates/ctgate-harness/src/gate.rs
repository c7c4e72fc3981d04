//! Gate evaluation over the check results of a run.

use serde::{Deserialize, Serialize};

use crate::check::CheckKind;
use crate::runner::CheckResult;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Pass/fail rules for a harness run.
pub struct HarnessGate;

impl HarnessGate {
    /// Evaluate whether the run certifies the container.
    ///
    /// Gate rule:
    /// - every check of [`CheckKind::ALL`] must have a result, in order
    /// - every result must have passed
    ///
    /// A failed check is one violation; each check that never ran because
    /// the run halted is another.
    pub fn evaluate(results: &[CheckResult]) -> GateVerdict {
        let mut violations = Vec::new();

        for (position, expected) in CheckKind::ALL.iter().enumerate() {
            match results.get(position) {
                Some(result) if result.check != *expected => {
                    violations.push(format!(
                        "check '{}' ran at position {} where '{}' was expected",
                        result.check, position, expected
                    ));
                }
                Some(result) if !result.passed => {
                    violations.push(format!("check '{}' failed: {}", result.check, result.detail));
                }
                Some(_) => {}
                None => {
                    violations.push(format!("check '{}' did not run", expected));
                }
            }
        }

        for extra in results.iter().skip(CheckKind::ALL.len()) {
            violations.push(format!("unexpected extra result for '{}'", extra.check));
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} checks passed", CheckKind::ALL.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctgate_core::HarnessError;

    fn all_passing() -> Vec<CheckResult> {
        CheckKind::ALL
            .iter()
            .map(|c| CheckResult::pass(*c, 1, "ok"))
            .collect()
    }

    #[test]
    fn test_all_passing_passes() {
        let verdict = HarnessGate::evaluate(&all_passing());
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert_eq!(verdict.message, "All 12 checks passed");
    }

    #[test]
    fn test_empty_results_fail() {
        let verdict = HarnessGate::evaluate(&[]);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), CheckKind::ALL.len());
    }

    #[test]
    fn test_halted_run_lists_failure_and_skipped() {
        let mut results: Vec<CheckResult> = all_passing().into_iter().take(4).collect();
        let err = HarnessError::contract("health", "healthy marker", "{}");
        results.push(CheckResult::fail(CheckKind::Health, 2, &err));

        let verdict = HarnessGate::evaluate(&results);
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("'health' failed"));
        // readiness .. numeric_uid never ran
        assert_eq!(verdict.violations.len(), 1 + 7);
        assert!(verdict.violations.iter().any(|v| v.contains("'numeric_uid' did not run")));
    }

    #[test]
    fn test_out_of_order_is_violation() {
        let mut results = all_passing();
        results.swap(4, 5);
        let verdict = HarnessGate::evaluate(&results);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.violations[0].contains("position 4"));
    }
}
