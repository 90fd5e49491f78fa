//! Top-level validation configuration, loadable from TOML.
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 30000
//! max_concurrent_processes = 4
//!
//! [repair]
//! max_attempts = 3
//!
//! [metrics]
//! infectious_compartment = "I"
//! unverifiable = "pass"
//! ```
//!
//! Every section and field is optional and falls back to its default.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Result;
use crate::metrics::{Comparator, MetricConfig, MetricRegistry};
use crate::repair::{Orchestrator, RepairPolicy};
use crate::sandbox::{ProcessSandbox, SandboxConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub sandbox: SandboxConfig,
    pub repair: RepairPolicy,
    pub metrics: MetricConfig,
}

impl ValidationConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()?;
        self.repair.validate()?;
        self.metrics.validate()?;
        Ok(())
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_millis(self.repair.repair_timeout_ms)
    }

    /// Orchestrator backed by a fresh [`ProcessSandbox`] with this configuration.
    pub fn orchestrator(&self) -> Orchestrator {
        let sandbox = Arc::new(ProcessSandbox::new(self.sandbox.clone()));
        Orchestrator::new(sandbox)
            .with_comparator(Comparator::new(
                MetricRegistry::standard(),
                self.metrics.clone(),
            ))
            .with_policy(self.repair.clone())
            .with_timeout(self.sandbox.timeout())
    }
}
