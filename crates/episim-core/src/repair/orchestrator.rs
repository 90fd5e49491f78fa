//! The validation state machine: execute, evaluate, and repair until the
//! artifact passes or the attempt budget is spent.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{warn, Instrument};
use uuid::Uuid;

use super::collaborator::{ArtifactGenerator, ArtifactRepairer};
use super::error::{ExhaustedRun, RunError};
use super::policy::RepairPolicy;
use crate::domain::{ArtifactSet, ModelSpecification, RepairAttempt, ValidationReport};
use crate::metrics::Comparator;
use crate::obs;
use crate::sandbox::{Sandbox, SandboxConfig};

/// Orchestrator states. `Passed` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Ready,
    Executing,
    Evaluating,
    Repairing,
    Passed,
    Exhausted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Ready => "ready",
            RunState::Executing => "executing",
            RunState::Evaluating => "evaluating",
            RunState::Repairing => "repairing",
            RunState::Passed => "passed",
            RunState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Passed | RunState::Exhausted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that ended with a passing report.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRun {
    pub run_id: Uuid,
    /// The artifact set that passed.
    pub artifacts: ArtifactSet,
    /// One report per execution; the last one passed.
    pub reports: Vec<ValidationReport>,
    pub repairs: Vec<RepairAttempt>,
}

impl ValidatedRun {
    pub fn executions(&self) -> u32 {
        self.reports.len() as u32
    }

    pub fn final_report(&self) -> Option<&ValidationReport> {
        self.reports.last()
    }
}

/// Drives one artifact set through sandboxed execution, comparison, and
/// bounded repair.
///
/// An orchestrator holds no per-run state; one instance may drive many
/// concurrent runs, which then share the sandbox's spawn limit.
#[derive(Clone)]
pub struct Orchestrator {
    sandbox: Arc<dyn Sandbox>,
    comparator: Comparator,
    policy: RepairPolicy,
    timeout: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("comparator", &self.comparator)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            comparator: Comparator::default(),
            policy: RepairPolicy::default(),
            timeout: SandboxConfig::default().timeout(),
        }
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_policy(mut self, policy: RepairPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-execution wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Generate, then execute and repair until a report passes or
    /// `max_attempts` executions have happened.
    pub async fn run(
        &self,
        spec: &ModelSpecification,
        generator: &dyn ArtifactGenerator,
        repairer: &dyn ArtifactRepairer,
    ) -> Result<ValidatedRun, RunError> {
        let run_id = Uuid::new_v4();
        let span = obs::run_span(&run_id.to_string());
        self.drive(run_id, spec, generator, repairer)
            .instrument(span)
            .await
    }

    /// Like [`run`](Self::run), but stops as soon as `cancel` reads `true`.
    ///
    /// Cancelling drops the in-flight execution, which kills the artifact's
    /// process group and removes its working directory. A dropped sender
    /// never cancels.
    pub async fn run_with_cancel(
        &self,
        spec: &ModelSpecification,
        generator: &dyn ArtifactGenerator,
        repairer: &dyn ArtifactRepairer,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ValidatedRun, RunError> {
        if *cancel.borrow_and_update() {
            return Err(RunError::Cancelled);
        }
        tokio::select! {
            result = self.run(spec, generator, repairer) => result,
            _ = cancelled(&mut cancel) => {
                warn!(event = "run.cancelled", model = %spec.name, "validation run cancelled");
                Err(RunError::Cancelled)
            }
        }
    }

    async fn drive(
        &self,
        run_id: Uuid,
        spec: &ModelSpecification,
        generator: &dyn ArtifactGenerator,
        repairer: &dyn ArtifactRepairer,
    ) -> Result<ValidatedRun, RunError> {
        let id = run_id.to_string();
        spec.validate().map_err(RunError::InvalidSpecification)?;

        let started = Instant::now();
        obs::emit_run_started(&id, &spec.name, self.policy.max_attempts);

        let mut artifacts = match generator.generate(spec).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(event = "generation.failed", run_id = %id, error = %e);
                obs::emit_run_finished(&id, elapsed_ms(started), 0, false);
                return Err(e.into());
            }
        };

        let mut state = RunState::Ready;
        let mut attempt: u32 = 1;
        let mut reports: Vec<ValidationReport> = Vec::new();
        let mut repairs: Vec<RepairAttempt> = Vec::new();

        loop {
            transition(&id, &mut state, RunState::Executing, attempt);
            let report = match self.sandbox.execute(&artifacts, spec, self.timeout).await {
                Ok(trajectory) => {
                    transition(&id, &mut state, RunState::Evaluating, attempt);
                    self.comparator.evaluate(&trajectory, spec, attempt)
                }
                Err(failure) => {
                    ValidationReport::from_execution_failure(&spec.name, attempt, failure)
                }
            };
            obs::emit_attempt_finished(&id, &report);
            reports.push(report.clone());

            if report.all_passed {
                transition(&id, &mut state, RunState::Passed, attempt);
                obs::emit_run_finished(&id, elapsed_ms(started), attempt, true);
                return Ok(ValidatedRun {
                    run_id,
                    artifacts,
                    reports,
                    repairs,
                });
            }

            if !self.policy.allows_repair_after(attempt) {
                transition(&id, &mut state, RunState::Exhausted, attempt);
                obs::emit_run_finished(&id, elapsed_ms(started), attempt, false);
                return Err(exhausted(run_id, artifacts, reports, repairs, None));
            }

            transition(&id, &mut state, RunState::Repairing, attempt);
            let before = artifacts.digest();
            obs::emit_repair_requested(&id, attempt, &before);
            let replacement = match repairer.repair(spec, &artifacts, &report).await {
                Ok(replacement) => replacement,
                Err(e) => {
                    obs::emit_repair_failed(&id, attempt, &e);
                    transition(&id, &mut state, RunState::Exhausted, attempt);
                    obs::emit_run_finished(&id, elapsed_ms(started), attempt, false);
                    return Err(exhausted(
                        run_id,
                        artifacts,
                        reports,
                        repairs,
                        Some(e.to_string()),
                    ));
                }
            };

            let unchanged = replacement.digest() == before;
            if unchanged {
                warn!(event = "repair.unchanged", run_id = %id, attempt = attempt);
            }
            repairs.push(RepairAttempt {
                attempt_index: attempt,
                report_before_repair: report,
                artifacts_after_repair: replacement.clone(),
                unchanged,
                recorded_at: Utc::now(),
            });
            artifacts = replacement;
            attempt += 1;
        }
    }
}

fn transition(run_id: &str, state: &mut RunState, next: RunState, attempt: u32) {
    obs::emit_transition(run_id, state.as_str(), next.as_str(), attempt);
    *state = next;
}

fn exhausted(
    run_id: Uuid,
    artifacts: ArtifactSet,
    reports: Vec<ValidationReport>,
    repairs: Vec<RepairAttempt>,
    repair_error: Option<String>,
) -> RunError {
    RunError::RepairExhausted(Box::new(ExhaustedRun {
        run_id,
        artifacts,
        reports,
        repairs,
        repair_error,
    }))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Resolves once the flag reads `true`; pends forever if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::Repairing.to_string(), "repairing");
        assert!(RunState::Passed.is_terminal());
        assert!(RunState::Exhausted.is_terminal());
        assert!(!RunState::Evaluating.is_terminal());
    }

    #[test]
    fn test_transition_updates_state() {
        let mut state = RunState::Ready;
        transition("r", &mut state, RunState::Executing, 1);
        assert_eq!(state, RunState::Executing);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tx.send(true).expect("send");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resolved")
            .expect("join");
    }

    #[tokio::test]
    async fn test_cancelled_pends_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let pending = tokio::time::timeout(Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(pending.is_err());
    }
}
