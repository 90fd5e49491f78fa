//! Metric configuration.

use serde::{Deserialize, Serialize};

use crate::domain::{EpisimError, Result};

/// What a metric that cannot be computed counts as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiablePolicy {
    /// Unverifiable claims never block an otherwise-correct artifact.
    #[default]
    Pass,
    /// Every claim must be verified.
    Fail,
}

impl UnverifiablePolicy {
    pub fn passes(self) -> bool {
        self == UnverifiablePolicy::Pass
    }
}

/// Which compartments and parameters play which role in the built-in metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricConfig {
    /// Infectious-like compartment. When unset, the first compartment whose
    /// name starts with `I` is used.
    pub infectious_compartment: Option<String>,
    pub susceptible_compartment: String,
    pub recovered_compartment: String,
    /// Parameter names used for `R0 = beta / gamma` on small models.
    pub transmission_parameter: String,
    pub recovery_parameter: String,
    /// `epidemic_duration` counts samples where infectious > population * this.
    pub duration_threshold_fraction: f64,
    pub unverifiable: UnverifiablePolicy,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            infectious_compartment: None,
            susceptible_compartment: "S".to_string(),
            recovered_compartment: "R".to_string(),
            transmission_parameter: "beta".to_string(),
            recovery_parameter: "gamma".to_string(),
            duration_threshold_fraction: 0.001,
            unverifiable: UnverifiablePolicy::Pass,
        }
    }
}

impl MetricConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.duration_threshold_fraction.is_finite() || self.duration_threshold_fraction < 0.0
        {
            return Err(EpisimError::InvalidConfig(format!(
                "metrics.duration_threshold_fraction must be finite and nonnegative, got {}",
                self.duration_threshold_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_config_default() {
        let cfg = MetricConfig::default();
        assert!(cfg.infectious_compartment.is_none());
        assert_eq!(cfg.duration_threshold_fraction, 0.001);
        assert!(cfg.unverifiable.passes());
        cfg.validate().expect("valid");
    }

    #[test]
    fn test_policy_serde() {
        let cfg: MetricConfig =
            serde_json::from_str(r#"{"unverifiable": "fail"}"#).expect("parse");
        assert_eq!(cfg.unverifiable, UnverifiablePolicy::Fail);
        assert!(!cfg.unverifiable.passes());
        assert_eq!(cfg.susceptible_compartment, "S");
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let cfg = MetricConfig {
            duration_threshold_fraction: -1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
