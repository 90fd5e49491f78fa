//! Sandbox configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EpisimError, Result};

/// Configuration for sandboxed artifact execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for a single execution (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of artifact processes alive at once across all runs
    /// sharing this sandbox.
    pub max_concurrent_processes: usize,
    /// Cap on captured stdout and stderr, each (bytes). Excess output is drained and dropped.
    pub max_output_bytes: usize,
    /// Environment variables copied from the host into the child. Everything
    /// else is cleared.
    pub passthrough_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_concurrent_processes: 4,
            max_output_bytes: 16 * 1024 * 1024,
            passthrough_env: ["PATH", "HOME", "LANG", "TMPDIR", "SYSTEMROOT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(EpisimError::InvalidConfig(
                "sandbox.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_processes == 0 {
            return Err(EpisimError::InvalidConfig(
                "sandbox.max_concurrent_processes must be greater than zero".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(EpisimError::InvalidConfig(
                "sandbox.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_concurrent_processes, 4);
        assert!(cfg.passthrough_env.iter().any(|k| k == "PATH"));
        cfg.validate().expect("default is valid");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = SandboxConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: SandboxConfig = serde_json::from_str(r#"{"timeout_ms": 5000}"#).expect("parse");
        assert_eq!(cfg.timeout_ms, 5000);
        assert_eq!(cfg.max_concurrent_processes, 4);
    }
}
