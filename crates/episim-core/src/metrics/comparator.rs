//! Comparison of computed metrics against expected results.
//!
//! `evaluate` is a pure function of its inputs: no I/O, no clock, no
//! randomness. Calling it twice on the same trajectory and specification
//! yields identical reports.

use super::config::MetricConfig;
use super::registry::{MetricContext, MetricRegistry, NotComputable};
use crate::domain::{
    ExpectedResult, MetricResult, MetricStatus, ModelSpecification, Trajectory, ValidationReport,
};

/// Compare a computed `actual` against one expected result.
///
/// `passed` is decided on the unscaled deviation `|1 - actual/expected|`
/// against `tolerance`, so a deviation exactly at the tolerance passes. When
/// `expected` is zero the deviation is undefined and only an exact zero passes.
pub fn compare(expected: &ExpectedResult, actual: f64) -> MetricResult {
    let (deviation, passed) = if expected.expected == 0.0 {
        if actual == 0.0 {
            (Some(0.0), true)
        } else {
            (None, false)
        }
    } else {
        let deviation = (1.0 - actual / expected.expected).abs();
        (Some(deviation), deviation <= expected.tolerance)
    };

    MetricResult {
        metric: expected.metric.clone(),
        expected: expected.expected,
        tolerance: expected.tolerance,
        actual: Some(actual),
        match_percent: deviation.map(|d| d * 100.0),
        passed,
        status: if passed {
            MetricStatus::Matched
        } else {
            MetricStatus::ToleranceExceeded
        },
    }
}

/// Computes every expected result of a specification and renders a verdict.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    registry: MetricRegistry,
    config: MetricConfig,
}

impl Comparator {
    pub fn new(registry: MetricRegistry, config: MetricConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    fn not_computable(&self, expected: &ExpectedResult, reason: NotComputable) -> MetricResult {
        MetricResult {
            metric: expected.metric.clone(),
            expected: expected.expected,
            tolerance: expected.tolerance,
            actual: None,
            match_percent: None,
            passed: self.config.unverifiable.passes(),
            status: MetricStatus::NotComputable { reason: reason.0 },
        }
    }

    /// Evaluate `spec.expected_results` against `trajectory` for attempt `attempt_number`.
    ///
    /// `all_passed` holds iff every result passed; under the default policy
    /// not-computable results pass, so a report with no computable metrics
    /// (including one with no expectations at all) is vacuously passing.
    pub fn evaluate(
        &self,
        trajectory: &Trajectory,
        spec: &ModelSpecification,
        attempt_number: u32,
    ) -> ValidationReport {
        let ctx = MetricContext {
            trajectory,
            spec,
            config: &self.config,
        };

        let metrics: Vec<MetricResult> = spec
            .expected_results
            .iter()
            .map(|er| match self.registry.get(&er.metric) {
                None => self.not_computable(er, NotComputable("unrecognized metric".to_string())),
                Some(metric) => match metric.compute(&ctx) {
                    Ok(actual) => compare(er, actual),
                    Err(reason) => self.not_computable(er, reason),
                },
            })
            .collect();

        let all_passed = metrics.iter().all(|m| m.passed);

        ValidationReport {
            model_name: spec.name.clone(),
            attempt_number,
            metrics,
            all_passed,
            execution_error: None,
        }
    }
}

/// Evaluate with the standard registry and default configuration.
pub fn evaluate(trajectory: &Trajectory, spec: &ModelSpecification) -> ValidationReport {
    Comparator::default().evaluate(trajectory, spec, 1)
}
