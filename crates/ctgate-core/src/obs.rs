//! Structured observability hooks for the harness run lifecycle.
//!
//! Every emitter logs an `event` field so harness logs satisfy the same
//! structured-record contract the harness enforces on the container.

use tracing::{info, warn};

/// Span tagging everything a run logs with its run id and image.
///
/// The harness is async, so attach it with `tracing::Instrument` rather
/// than entering it across `.await` points.
pub fn run_span(run_id: &str, image: &str) -> tracing::Span {
    tracing::info_span!("ctgate.run", run_id = %run_id, image = %image)
}

pub fn emit_run_started(run_id: &str, image: &str, container_name: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        image = %image,
        container = %container_name,
    );
}

/// Emit event: a check passed.
pub fn emit_check_passed(check: &str, ordinal: usize, duration_ms: u64) {
    info!(
        event = "check.passed",
        check = %check,
        ordinal = ordinal,
        duration_ms = duration_ms,
    );
}

/// Emit event: a check failed; the run halts after this.
pub fn emit_check_failed(check: &str, ordinal: usize, kind: &str, detail: &str) {
    warn!(
        event = "check.failed",
        check = %check,
        ordinal = ordinal,
        kind = %kind,
        detail = %detail,
    );
}

/// Emit event: one attempt of a bounded readiness poll did not succeed yet.
pub fn emit_readiness_attempt(target: &str, attempt: u32, next_delay_ms: u64, observation: &str) {
    tracing::debug!(
        event = "readiness.attempt",
        target = %target,
        attempt = attempt,
        next_delay_ms = next_delay_ms,
        observation = %observation,
    );
}

/// Emit event: container teardown finished (or failed).
pub fn emit_teardown(container: &str, ok: bool, error: Option<&dyn std::fmt::Display>) {
    match error {
        Some(err) => warn!(event = "container.teardown", container = %container, ok = ok, error = %err),
        None => info!(event = "container.teardown", container = %container, ok = ok),
    }
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, checks_run: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        checks_run = checks_run,
        success = success,
    );
}
