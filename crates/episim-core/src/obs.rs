//! Lifecycle events for validation runs.
//!
//! Every event carries `run_id` and an `event` name (`run.started`,
//! `validation.transition`, `attempt.finished`, `repair.requested`,
//! `repair.failed`, `run.finished`) so JSON logs can be grouped per run.
//! Format and level are chosen by [`init_tracing`](crate::telemetry::init_tracing).

use tracing::{info, warn};

use crate::domain::ValidationReport;

/// Span tagged with the run id; every event of a run is recorded inside it.
///
/// # Example
///
/// ```ignore
/// orchestrator.drive(..).instrument(run_span("0b1f..")).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("validation.run", run_id = %run_id)
}

/// Emit event: run started for a model with its attempt budget.
pub fn emit_run_started(run_id: &str, model_name: &str, max_attempts: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        model = %model_name,
        max_attempts = max_attempts,
    );
}

/// Emit event: orchestrator state transition.
pub fn emit_transition(run_id: &str, from: &str, to: &str, attempt: u32) {
    info!(
        event = "validation.transition",
        run_id = %run_id,
        from = %from,
        to = %to,
        attempt = attempt,
    );
}

/// Emit event: one attempt was judged.
pub fn emit_attempt_finished(run_id: &str, report: &ValidationReport) {
    let failure_kind = report.execution_error.as_ref().map(|e| e.kind.to_string());
    info!(
        event = "attempt.finished",
        run_id = %run_id,
        attempt = report.attempt_number,
        passed = report.all_passed,
        metrics = report.metrics.len(),
        computable = report.computable_count(),
        failure = failure_kind.as_deref().unwrap_or("none"),
        summary = %report.summary(),
    );
}

/// Emit event: the repair collaborator is being asked for a replacement set.
pub fn emit_repair_requested(run_id: &str, attempt: u32, artifact_digest: &str) {
    info!(
        event = "repair.requested",
        run_id = %run_id,
        attempt = attempt,
        artifact_digest = %artifact_digest,
    );
}

/// Emit event: the repair collaborator failed (warning level).
pub fn emit_repair_failed(run_id: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "repair.failed", run_id = %run_id, attempt = attempt, error = %error);
}

/// Emit event: run finished with duration, executions used, and outcome.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, executions: u32, passed: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        executions = executions,
        passed = passed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _entered = span.enter();
        emit_transition("test-run-id", "ready", "executing", 1);
    }
}
