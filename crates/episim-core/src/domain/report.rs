//! Validation reports and the repair audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::ArtifactSet;
use crate::sandbox::ExecutionFailure;

/// How a single metric comparison concluded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricStatus {
    /// Computed and within tolerance.
    Matched,
    /// Computed and outside tolerance.
    ToleranceExceeded,
    /// Could not be computed; `passed` is decided by the unverifiable-metric policy.
    NotComputable { reason: String },
}

/// Outcome of comparing one expected result against the trajectory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResult {
    pub metric: String,
    pub expected: f64,
    pub tolerance: f64,
    /// Computed value; absent when the metric is not computable.
    pub actual: Option<f64>,
    /// `|1 - actual/expected| * 100`; absent when undefined (`expected == 0`
    /// with a nonzero actual) or not computable.
    pub match_percent: Option<f64>,
    pub passed: bool,
    pub status: MetricStatus,
}

impl MetricResult {
    /// Whether a value was actually computed and compared.
    pub fn is_computable(&self) -> bool {
        !matches!(self.status, MetricStatus::NotComputable { .. })
    }
}

/// Verdict for one sandbox execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub model_name: String,
    /// 1-based attempt this report belongs to.
    pub attempt_number: u32,
    pub metrics: Vec<MetricResult>,
    pub all_passed: bool,
    /// Set when the artifact could not produce a trajectory at all.
    pub execution_error: Option<ExecutionFailure>,
}

impl ValidationReport {
    /// Report for an attempt whose execution failed before any metric could be computed.
    pub fn from_execution_failure(
        model_name: impl Into<String>,
        attempt_number: u32,
        failure: ExecutionFailure,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            attempt_number,
            metrics: Vec::new(),
            all_passed: false,
            execution_error: Some(failure),
        }
    }

    /// Metrics that were computed and missed their tolerance.
    pub fn failed_metrics(&self) -> Vec<&MetricResult> {
        self.metrics.iter().filter(|m| !m.passed).collect()
    }

    pub fn computable_count(&self) -> usize {
        self.metrics.iter().filter(|m| m.is_computable()).count()
    }

    /// One-line human summary, used in logs.
    pub fn summary(&self) -> String {
        if let Some(err) = &self.execution_error {
            return format!("attempt {}: execution failed ({})", self.attempt_number, err.kind);
        }
        let failed: Vec<&str> = self
            .failed_metrics()
            .iter()
            .map(|m| m.metric.as_str())
            .collect();
        if failed.is_empty() {
            format!(
                "attempt {}: passed ({} of {} metrics computable)",
                self.attempt_number,
                self.computable_count(),
                self.metrics.len()
            )
        } else {
            format!(
                "attempt {}: failed metrics: {}",
                self.attempt_number,
                failed.join(", ")
            )
        }
    }
}

/// Audit record of one repair: the failing report and the replacement it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairAttempt {
    /// Attempt whose failure triggered this repair.
    pub attempt_index: u32,
    pub report_before_repair: ValidationReport,
    pub artifacts_after_repair: ArtifactSet,
    /// The collaborator returned content identical to what it was given.
    pub unchanged: bool,
    pub recorded_at: DateTime<Utc>,
}
