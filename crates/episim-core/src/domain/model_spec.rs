//! Model specification: the immutable contract every artifact is validated against.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{EpisimError, Result};

/// Default fractional tolerance for an expected result.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Default number of output samples requested from an artifact.
pub const DEFAULT_SAMPLE_COUNT: usize = 1000;

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_sample_count() -> usize {
    DEFAULT_SAMPLE_COUNT
}

/// A single claim to verify: `metric` should be within `tolerance` of `expected`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectedResult {
    /// Metric name, looked up in the metric registry.
    pub metric: String,

    /// Value reported by the source.
    pub expected: f64,

    /// Maximum allowed fractional deviation (0.05 = 5%).
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Where the value came from ("Figure 3", "Table 2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ExpectedResult {
    /// Create an expected result with an explicit tolerance.
    pub fn new(metric: impl Into<String>, expected: f64, tolerance: f64) -> Self {
        Self {
            metric: metric.into(),
            expected,
            tolerance,
            source: None,
        }
    }

    /// Attach a citation for the expected value.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Structured description of a compartmental model and the results it must reproduce.
///
/// Compartment order is significant: it defines the positional meaning of an
/// artifact's state vector and of the initial-condition vector handed to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpecification {
    /// Model name (e.g. "SEIR with vaccination").
    pub name: String,

    /// Title of the source the model was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_title: Option<String>,

    /// Ordered, distinct compartment names.
    pub compartments: Vec<String>,

    /// Parameter name to value.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,

    /// Compartment name to nonnegative initial value.
    pub initial_conditions: BTreeMap<String, f64>,

    /// Claims to verify, in reporting order.
    #[serde(default)]
    pub expected_results: Vec<ExpectedResult>,

    /// Length of the simulated time span, in model time units (days).
    pub simulation_horizon: f64,

    /// Population constant `N`.
    pub population: f64,

    /// Number of samples the artifact is asked to emit.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Closed-form R0 over parameter names, for models with more than four compartments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r0_expression: Option<String>,
}

impl ModelSpecification {
    /// Create a specification with no parameters, initial conditions or expectations.
    pub fn new(
        name: impl Into<String>,
        compartments: Vec<String>,
        simulation_horizon: f64,
        population: f64,
    ) -> Self {
        Self {
            name: name.into(),
            paper_title: None,
            compartments,
            parameters: BTreeMap::new(),
            initial_conditions: BTreeMap::new(),
            expected_results: Vec::new(),
            simulation_horizon,
            population,
            sample_count: DEFAULT_SAMPLE_COUNT,
            r0_expression: None,
        }
    }

    pub fn with_paper_title(mut self, title: impl Into<String>) -> Self {
        self.paper_title = Some(title.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_initial_condition(mut self, compartment: impl Into<String>, value: f64) -> Self {
        self.initial_conditions.insert(compartment.into(), value);
        self
    }

    pub fn with_expected(mut self, expected: ExpectedResult) -> Self {
        self.expected_results.push(expected);
        self
    }

    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_r0_expression(mut self, expression: impl Into<String>) -> Self {
        self.r0_expression = Some(expression.into());
        self
    }

    /// Check every structural invariant of the specification.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EpisimError::InvalidSpecification(msg));

        if self.compartments.is_empty() {
            return invalid("compartments cannot be empty".to_string());
        }

        let mut seen = BTreeSet::new();
        for name in &self.compartments {
            if name.trim().is_empty() {
                return invalid("compartment names cannot be blank".to_string());
            }
            if name == "t" {
                return invalid("compartment name `t` is reserved for time points".to_string());
            }
            if !seen.insert(name.as_str()) {
                return invalid(format!("duplicate compartment `{name}`"));
            }
        }

        for name in &self.compartments {
            if !self.initial_conditions.contains_key(name) {
                return invalid(format!("compartment `{name}` has no initial condition"));
            }
        }
        for (name, value) in &self.initial_conditions {
            if !seen.contains(name.as_str()) {
                return invalid(format!(
                    "initial condition for unknown compartment `{name}`"
                ));
            }
            if !value.is_finite() || *value < 0.0 {
                return invalid(format!(
                    "initial condition for `{name}` must be finite and nonnegative, got {value}"
                ));
            }
        }

        for (name, value) in &self.parameters {
            if !value.is_finite() {
                return invalid(format!("parameter `{name}` must be finite, got {value}"));
            }
        }

        if !self.simulation_horizon.is_finite() || self.simulation_horizon <= 0.0 {
            return invalid(format!(
                "simulation horizon must be positive, got {}",
                self.simulation_horizon
            ));
        }
        if !self.population.is_finite() || self.population <= 0.0 {
            return invalid(format!(
                "population must be positive, got {}",
                self.population
            ));
        }
        if self.sample_count < 2 {
            return invalid(format!(
                "sample count must be at least 2, got {}",
                self.sample_count
            ));
        }

        for er in &self.expected_results {
            if er.metric.trim().is_empty() {
                return invalid("expected result has an empty metric name".to_string());
            }
            if !er.expected.is_finite() {
                return invalid(format!(
                    "expected value for `{}` must be finite",
                    er.metric
                ));
            }
            if !er.tolerance.is_finite() || er.tolerance < 0.0 {
                return invalid(format!(
                    "tolerance for `{}` must be finite and nonnegative, got {}",
                    er.metric, er.tolerance
                ));
            }
        }

        Ok(())
    }

    /// Initial values in compartment order.
    pub fn initial_vector(&self) -> Vec<f64> {
        self.compartments
            .iter()
            .map(|c| self.initial_conditions.get(c).copied().unwrap_or(0.0))
            .collect()
    }

    pub fn has_compartment(&self, name: &str) -> bool {
        self.compartments.iter().any(|c| c == name)
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Parse and validate a specification from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read, parse and validate a specification file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
