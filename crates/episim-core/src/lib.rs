//! EpiSim Validation Core
//!
//! Executes generated epidemic-model artifacts in an isolated, time-bounded
//! sandbox, checks the resulting trajectory against the metrics a model
//! specification expects, and drives a bounded repair loop when they miss.

pub mod config;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod repair;
pub mod reporting;
pub mod sandbox;
pub mod telemetry;

pub use config::ValidationConfig;

pub use domain::{
    sha256_hex, ArtifactSet, Entrypoint, EpisimError, ExpectedResult, MetricResult, MetricStatus,
    ModelSpecification, RepairAttempt, Result, Trajectory, ValidationReport,
};

pub use sandbox::{
    parse_trajectory, ArtifactInput, ExecutionFailure, ExecutionFailureKind, ProcessSandbox,
    Sandbox, SandboxConfig,
};

pub use metrics::{
    compare, evaluate, BuiltinMetric, Comparator, Metric, MetricConfig, MetricContext,
    MetricRegistry, NotComputable, UnverifiablePolicy,
};

pub use repair::{
    ArtifactGenerator, ArtifactRepairer, CommandRepairer, DirectoryGenerator, ExhaustedRun,
    GenerationError, NoRepair, Orchestrator, RepairError, RepairPolicy, RunError, RunState,
    StaticGenerator, ValidatedRun,
};

pub use reporting::{
    read_history_json, render_report_md, write_history_json, write_report_md, RunHistory,
};

pub use obs::{
    emit_attempt_finished, emit_repair_failed, emit_repair_requested, emit_run_finished,
    emit_run_started, emit_transition, run_span,
};
pub use telemetry::{init_tracing, LogFormat};

/// EpiSim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
