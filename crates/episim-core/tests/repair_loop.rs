//! Repair loop behaviour against a scripted in-memory sandbox.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use episim_core::{
    parse_trajectory, read_history_json, render_report_md, write_history_json, ArtifactGenerator,
    ArtifactRepairer, ArtifactSet, Entrypoint, ExecutionFailure, ExecutionFailureKind,
    ExpectedResult, GenerationError, MetricStatus, ModelSpecification, NoRepair, Orchestrator,
    RepairError, RepairPolicy, RunError, RunHistory, Sandbox, StaticGenerator, Trajectory,
    ValidationReport,
};

// -------------------------------------------------------------------------
// Fakes
// -------------------------------------------------------------------------

type Behaviour = dyn Fn(&ArtifactSet) -> Result<Trajectory, ExecutionFailure> + Send + Sync;

struct FakeSandbox {
    behaviour: Box<Behaviour>,
    executions: AtomicU32,
    delay: Option<Duration>,
}

impl FakeSandbox {
    fn new<F>(behaviour: F) -> Arc<Self>
    where
        F: Fn(&ArtifactSet) -> Result<Trajectory, ExecutionFailure> + Send + Sync + 'static,
    {
        Arc::new(Self {
            behaviour: Box::new(behaviour),
            executions: AtomicU32::new(0),
            delay: None,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Box::new(|_: &ArtifactSet| Ok(peaked(100.0))),
            executions: AtomicU32::new(0),
            delay: Some(delay),
        })
    }

    fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn execute(
        &self,
        artifacts: &ArtifactSet,
        _spec: &ModelSpecification,
        _timeout: Duration,
    ) -> Result<Trajectory, ExecutionFailure> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.behaviour)(artifacts)
    }
}

/// Returns `next` and records every report it was shown.
struct RecordingRepairer {
    next: Result<ArtifactSet, RepairError>,
    seen: Mutex<Vec<ValidationReport>>,
}

impl RecordingRepairer {
    fn returning(next: Result<ArtifactSet, RepairError>) -> Self {
        Self {
            next,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactRepairer for RecordingRepairer {
    async fn repair(
        &self,
        _spec: &ModelSpecification,
        _artifacts: &ArtifactSet,
        report: &ValidationReport,
    ) -> Result<ArtifactSet, RepairError> {
        self.seen.lock().unwrap().push(report.clone());
        self.next.clone()
    }
}

/// Returns whatever it was given.
struct IdentityRepairer;

#[async_trait]
impl ArtifactRepairer for IdentityRepairer {
    async fn repair(
        &self,
        _spec: &ModelSpecification,
        artifacts: &ArtifactSet,
        _report: &ValidationReport,
    ) -> Result<ArtifactSet, RepairError> {
        Ok(artifacts.clone())
    }
}

struct FailingGenerator;

#[async_trait]
impl ArtifactGenerator for FailingGenerator {
    async fn generate(&self, _spec: &ModelSpecification) -> Result<ArtifactSet, GenerationError> {
        Err(GenerationError::Failed("model has no closed form".to_string()))
    }
}

// -------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn sir_spec() -> ModelSpecification {
    ModelSpecification::new("SIR", names(&["S", "I", "R"]), 2.0, 1000.0)
        .with_parameter("beta", 0.3)
        .with_parameter("gamma", 0.1)
        .with_initial_condition("S", 999.0)
        .with_initial_condition("I", 1.0)
        .with_initial_condition("R", 0.0)
        .with_expected(ExpectedResult::new("peak_cases", 100.0, 0.05))
}

fn peaked(peak: f64) -> Trajectory {
    Trajectory::clamped(
        vec![0.0, 1.0, 2.0],
        names(&["S", "I", "R"]),
        vec![
            vec![999.0, 800.0, 700.0],
            vec![1.0, peak, 50.0],
            vec![0.0, 100.0, 250.0],
        ],
    )
}

fn artifacts(name: &str) -> ArtifactSet {
    ArtifactSet::new(name, Entrypoint::new("python3").with_arg("model.py"))
        .with_file("model.py", format!("# {name}"))
}

/// `fixed` artifacts hit the expected peak, anything else misses it badly.
fn peak_by_name(set: &ArtifactSet) -> Result<Trajectory, ExecutionFailure> {
    if set.name == "fixed" {
        Ok(peaked(100.0))
    } else {
        Ok(peaked(50.0))
    }
}

fn orchestrator(sandbox: Arc<FakeSandbox>, max_attempts: u32) -> Orchestrator {
    Orchestrator::new(sandbox)
        .with_policy(RepairPolicy::new(max_attempts))
        .with_timeout(Duration::from_secs(5))
}

// -------------------------------------------------------------------------
// Passing runs
// -------------------------------------------------------------------------

#[tokio::test]
async fn passes_on_first_attempt_without_repair() {
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let repairer = RecordingRepairer::returning(Err(RepairError::Declined));
    let run = orchestrator(sandbox.clone(), 3)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .expect("pass");

    assert_eq!(sandbox.executions(), 1);
    assert_eq!(run.executions(), 1);
    assert!(run.repairs.is_empty());
    assert_eq!(repairer.calls(), 0);
    assert!(run.final_report().unwrap().all_passed);
}

#[tokio::test]
async fn failing_metric_is_repaired_then_passes() {
    let sandbox = FakeSandbox::new(peak_by_name);
    let repairer = RecordingRepairer::returning(Ok(artifacts("fixed")));
    let run = orchestrator(sandbox.clone(), 3)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .expect("pass after repair");

    assert_eq!(sandbox.executions(), 2);
    assert_eq!(run.artifacts.name, "fixed");
    assert_eq!(run.repairs.len(), 1);
    assert_eq!(run.repairs[0].attempt_index, 1);
    assert!(!run.repairs[0].unchanged);
    assert!(!run.reports[0].all_passed);
    assert_eq!(run.reports[1].attempt_number, 2);

    let seen = repairer.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].metrics[0].status, MetricStatus::ToleranceExceeded);
}

#[tokio::test]
async fn r0_mismatch_triggers_repair() {
    // beta/gamma = 0.30/0.12 = 2.5 against a reported 2.80: about 10.7% off.
    let mut spec = sir_spec().with_parameter("gamma", 0.12);
    spec.expected_results = vec![ExpectedResult::new("R0", 2.80, 0.05)];
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let repairer = RecordingRepairer::returning(Err(RepairError::Declined));

    let err = orchestrator(sandbox.clone(), 3)
        .run(&spec, &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .unwrap_err();

    assert_eq!(repairer.calls(), 1);
    let pct = repairer.seen.lock().unwrap()[0].metrics[0]
        .match_percent
        .unwrap();
    assert!((pct - 10.714).abs() < 0.01);
    assert!(err.exhausted().is_some());
}

#[tokio::test]
async fn unknown_metric_does_not_block_a_pass() {
    let spec =
        sir_spec().with_expected(ExpectedResult::new("herd_immunity_threshold", 0.6, 0.05));
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let run = orchestrator(sandbox, 3)
        .run(&spec, &StaticGenerator::new(artifacts("draft")), &NoRepair)
        .await
        .expect("pass");
    let report = run.final_report().unwrap();
    assert!(!report.metrics[1].is_computable());
    assert!(report.metrics[1].passed);
}

// -------------------------------------------------------------------------
// Bounded termination
// -------------------------------------------------------------------------

#[tokio::test]
async fn timeout_on_every_attempt_exhausts_budget() {
    let sandbox = FakeSandbox::new(|_| Err(ExecutionFailure::timeout(30_000)));
    let repairer = RecordingRepairer::returning(Ok(artifacts("retry")));
    let err = orchestrator(sandbox.clone(), 3)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .unwrap_err();

    assert_eq!(sandbox.executions(), 3);
    let run = err.exhausted().expect("exhausted");
    assert_eq!(run.reports.len(), 3);
    assert_eq!(run.repairs.len(), 2);
    assert!(run.repair_error.is_none());
    for (i, report) in run.reports.iter().enumerate() {
        assert_eq!(report.attempt_number, i as u32 + 1);
        assert_eq!(
            report.execution_error.as_ref().map(|e| e.kind),
            Some(ExecutionFailureKind::Timeout)
        );
    }
}

#[tokio::test]
async fn contract_violation_is_eligible_for_repair() {
    let spec = sir_spec();
    let compartments = spec.compartments.clone();
    let sandbox = FakeSandbox::new(move |set| {
        if set.name == "fixed" {
            return Ok(peaked(100.0));
        }
        parse_trajectory(br#"{"t":[0,1],"S":[999,990],"I":[1,8]}"#, &compartments)
    });
    let repairer = RecordingRepairer::returning(Ok(artifacts("fixed")));
    let run = orchestrator(sandbox, 3)
        .run(&spec, &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .expect("pass after repair");

    let first = &run.reports[0];
    assert_eq!(
        first.execution_error.as_ref().map(|e| e.kind),
        Some(ExecutionFailureKind::ContractViolation)
    );
    assert!(first.metrics.is_empty());
    assert_eq!(run.executions(), 2);
}

#[tokio::test]
async fn unchanged_repair_is_still_bounded() {
    let sandbox = FakeSandbox::new(peak_by_name);
    let err = orchestrator(sandbox.clone(), 4)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &IdentityRepairer)
        .await
        .unwrap_err();

    assert_eq!(sandbox.executions(), 4);
    let run = err.exhausted().expect("exhausted");
    assert_eq!(run.repairs.len(), 3);
    assert!(run.repairs.iter().all(|r| r.unchanged));
}

#[tokio::test]
async fn single_attempt_budget_never_repairs() {
    let sandbox = FakeSandbox::new(peak_by_name);
    let repairer = RecordingRepairer::returning(Ok(artifacts("fixed")));
    let err = orchestrator(sandbox.clone(), 1)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .unwrap_err();

    assert_eq!(sandbox.executions(), 1);
    assert_eq!(repairer.calls(), 0);
    assert_eq!(err.exhausted().map(|r| r.executions()), Some(1));
}

#[tokio::test]
async fn repair_error_stops_loop_early() {
    let sandbox = FakeSandbox::new(peak_by_name);
    let repairer =
        RecordingRepairer::returning(Err(RepairError::Failed("model refused".to_string())));
    let err = orchestrator(sandbox.clone(), 3)
        .run(&sir_spec(), &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .unwrap_err();

    assert_eq!(sandbox.executions(), 1);
    let run = err.exhausted().expect("exhausted");
    assert_eq!(
        run.repair_error.as_deref(),
        Some("repair command failed: model refused")
    );
    assert_eq!(run.artifacts.name, "draft");
}

// -------------------------------------------------------------------------
// Fatal errors
// -------------------------------------------------------------------------

#[tokio::test]
async fn generation_error_means_zero_executions() {
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let err = orchestrator(sandbox.clone(), 3)
        .run(&sir_spec(), &FailingGenerator, &NoRepair)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Generation(_)));
    assert_eq!(sandbox.executions(), 0);
}

#[tokio::test]
async fn invalid_specification_rejected_before_execution() {
    let spec = sir_spec().with_initial_condition("X", 5.0);
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let err = orchestrator(sandbox.clone(), 3)
        .run(&spec, &StaticGenerator::new(artifacts("draft")), &NoRepair)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::InvalidSpecification(_)));
    assert_eq!(sandbox.executions(), 0);
}

// -------------------------------------------------------------------------
// Cancellation and concurrency
// -------------------------------------------------------------------------

#[tokio::test]
async fn cancel_stops_in_flight_run() {
    let sandbox = FakeSandbox::slow(Duration::from_secs(30));
    let orch = orchestrator(sandbox.clone(), 3);
    let spec = sir_spec();
    let generator = StaticGenerator::new(artifacts("draft"));
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run_with_cancel(&spec, &generator, &NoRepair, rx),
    )
    .await
    .expect("cancelled promptly");
    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(sandbox.executions(), 1);
}

#[tokio::test]
async fn pre_cancelled_run_never_executes() {
    let sandbox = FakeSandbox::new(|_| Ok(peaked(100.0)));
    let (_tx, rx) = watch::channel(true);
    let result = orchestrator(sandbox.clone(), 3)
        .run_with_cancel(
            &sir_spec(),
            &StaticGenerator::new(artifacts("draft")),
            &NoRepair,
            rx,
        )
        .await;
    assert!(matches!(result, Err(RunError::Cancelled)));
    assert_eq!(sandbox.executions(), 0);
}

#[tokio::test]
async fn independent_runs_share_one_orchestrator() {
    let sandbox = FakeSandbox::new(peak_by_name);
    let orch = orchestrator(sandbox.clone(), 3);
    let spec = sir_spec();
    let passing = StaticGenerator::new(artifacts("fixed"));
    let failing = StaticGenerator::new(artifacts("draft"));

    let (a, b) = tokio::join!(
        orch.run(&spec, &passing, &NoRepair),
        orch.run(&spec, &failing, &NoRepair),
    );
    let a = a.expect("fixed passes");
    let b = b.unwrap_err();
    assert_ne!(Some(a.run_id), b.exhausted().map(|r| r.run_id));
    assert_eq!(sandbox.executions(), 2);
}

// -------------------------------------------------------------------------
// Persisted history
// -------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_run_history_roundtrips_with_digest() {
    let spec = sir_spec().with_paper_title("A toy outbreak");
    let sandbox = FakeSandbox::new(|_| Err(ExecutionFailure::timeout(1_000)));
    let repairer = RecordingRepairer::returning(Ok(artifacts("retry")));
    let err = orchestrator(sandbox, 2)
        .run(&spec, &StaticGenerator::new(artifacts("draft")), &repairer)
        .await
        .unwrap_err();
    let history = RunHistory::from_exhausted(&spec, err.exhausted().expect("exhausted"));
    assert_eq!(history.final_artifact_digest, artifacts("retry").digest());

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.json");
    write_history_json(&path, &history).expect("write");
    let loaded = read_history_json(&path).expect("read");
    assert_eq!(loaded, history);

    let md = render_report_md(&loaded);
    assert!(md.contains("**Status:** FAILED"));
    assert!(md.contains("**Attempts:** 2"));
    assert!(md.contains("## Repair History"));
}
