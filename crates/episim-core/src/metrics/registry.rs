//! Named scalar metrics over a trajectory.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::config::MetricConfig;
use super::expr;
use crate::domain::{ModelSpecification, Trajectory};

/// Reason a metric could not be computed for this trajectory and specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotComputable(pub String);

impl fmt::Display for NotComputable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a metric may read.
#[derive(Debug, Clone, Copy)]
pub struct MetricContext<'a> {
    pub trajectory: &'a Trajectory,
    pub spec: &'a ModelSpecification,
    pub config: &'a MetricConfig,
}

impl<'a> MetricContext<'a> {
    /// Configured infectious-like compartment, or the first one named `I...`.
    pub fn infectious_compartment(&self) -> Option<&'a str> {
        match &self.config.infectious_compartment {
            Some(name) => Some(name.as_str()),
            None => self
                .spec
                .compartments
                .iter()
                .find(|c| c.starts_with('I'))
                .map(String::as_str),
        }
    }

    /// Series for `compartment`, which must exist and be non-empty.
    pub fn series(&self, compartment: &str) -> Result<&'a [f64], NotComputable> {
        match self.trajectory.series(compartment) {
            Some(values) if !values.is_empty() => Ok(values),
            Some(_) => Err(NotComputable("trajectory is empty".to_string())),
            None => Err(NotComputable(format!(
                "compartment `{compartment}` not present"
            ))),
        }
    }

    pub fn infectious_series(&self) -> Result<&'a [f64], NotComputable> {
        let name = self.infectious_compartment().ok_or_else(|| {
            NotComputable("no infectious-like compartment configured or detected".to_string())
        })?;
        self.series(name)
    }

    pub fn parameter(&self, name: &str) -> Result<f64, NotComputable> {
        self.spec
            .parameter(name)
            .ok_or_else(|| NotComputable(format!("parameter `{name}` not present")))
    }
}

/// A named scalar computed from a trajectory and its specification.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn compute(&self, ctx: &MetricContext<'_>) -> Result<f64, NotComputable>;
}

/// The fixed built-in vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMetric {
    PeakDay,
    PeakCases,
    R0,
    AttackRate,
    EpidemicDuration,
    FinalRecovered,
}

impl BuiltinMetric {
    pub const ALL: [BuiltinMetric; 6] = [
        BuiltinMetric::PeakDay,
        BuiltinMetric::PeakCases,
        BuiltinMetric::R0,
        BuiltinMetric::AttackRate,
        BuiltinMetric::EpidemicDuration,
        BuiltinMetric::FinalRecovered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinMetric::PeakDay => "peak_day",
            BuiltinMetric::PeakCases => "peak_cases",
            BuiltinMetric::R0 => "R0",
            BuiltinMetric::AttackRate => "attack_rate",
            BuiltinMetric::EpidemicDuration => "epidemic_duration",
            BuiltinMetric::FinalRecovered => "final_recovered",
        }
    }
}

/// Index and value of the first maximum.
fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

fn r0(ctx: &MetricContext<'_>) -> Result<f64, NotComputable> {
    let value = if ctx.spec.compartments.len() <= 4 {
        let beta = ctx.parameter(&ctx.config.transmission_parameter)?;
        let gamma = ctx.parameter(&ctx.config.recovery_parameter)?;
        if gamma == 0.0 {
            return Err(NotComputable(format!(
                "parameter `{}` is zero",
                ctx.config.recovery_parameter
            )));
        }
        beta / gamma
    } else {
        let declared = ctx.spec.r0_expression.as_deref().ok_or_else(|| {
            NotComputable(format!(
                "no R0 expression declared for a {}-compartment model",
                ctx.spec.compartments.len()
            ))
        })?;
        expr::evaluate(declared, &ctx.spec.parameters)
            .map_err(|e| NotComputable(format!("R0 expression: {e}")))?
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(NotComputable(format!("R0 evaluated to {value}")))
    }
}

impl Metric for BuiltinMetric {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn compute(&self, ctx: &MetricContext<'_>) -> Result<f64, NotComputable> {
        match self {
            BuiltinMetric::PeakDay => {
                let series = ctx.infectious_series()?;
                let (idx, _) = argmax(series)
                    .ok_or_else(|| NotComputable("trajectory is empty".to_string()))?;
                ctx.trajectory
                    .times
                    .get(idx)
                    .copied()
                    .ok_or_else(|| NotComputable("time points shorter than series".to_string()))
            }
            BuiltinMetric::PeakCases => {
                let series = ctx.infectious_series()?;
                argmax(series)
                    .map(|(_, v)| v)
                    .ok_or_else(|| NotComputable("trajectory is empty".to_string()))
            }
            BuiltinMetric::R0 => r0(ctx),
            BuiltinMetric::AttackRate => {
                let series = ctx.series(&ctx.config.susceptible_compartment)?;
                let s_final = series[series.len() - 1];
                Ok(1.0 - s_final / ctx.spec.population)
            }
            BuiltinMetric::EpidemicDuration => {
                let series = ctx.infectious_series()?;
                let threshold = ctx.spec.population * ctx.config.duration_threshold_fraction;
                Ok(series.iter().filter(|v| **v > threshold).count() as f64)
            }
            BuiltinMetric::FinalRecovered => {
                let series = ctx.series(&ctx.config.recovered_compartment)?;
                Ok(series[series.len() - 1])
            }
        }
    }
}

/// Name-keyed set of metrics. Extend with [`MetricRegistry::with_metric`].
#[derive(Clone)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, Arc<dyn Metric>>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MetricRegistry {
    /// A registry with no metrics: every expected result is unrecognized.
    pub fn empty() -> Self {
        Self {
            metrics: BTreeMap::new(),
        }
    }

    /// The six built-in metrics.
    pub fn standard() -> Self {
        BuiltinMetric::ALL
            .iter()
            .fold(Self::empty(), |reg, m| reg.with_metric(Arc::new(*m)))
    }

    /// Register `metric` under its name, replacing any existing entry.
    pub fn with_metric(mut self, metric: Arc<dyn Metric>) -> Self {
        self.metrics.insert(metric.name().to_string(), metric);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Metric>> {
        self.metrics.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
