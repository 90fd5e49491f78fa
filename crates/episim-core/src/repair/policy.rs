//! Bounded repair policy.

use serde::{Deserialize, Serialize};

use crate::domain::{EpisimError, Result};

/// Policy governing automated repair attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairPolicy {
    /// Maximum number of executions per run, the first one included.
    pub max_attempts: u32,

    /// Wall-clock limit handed to [`CommandRepairer`](super::CommandRepairer) (milliseconds).
    pub repair_timeout_ms: u64,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            repair_timeout_ms: 120_000,
        }
    }
}

impl RepairPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EpisimError::InvalidConfig(
                "repair.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.repair_timeout_ms == 0 {
            return Err(EpisimError::InvalidConfig(
                "repair.repair_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a failed `attempt` may still be followed by a repair.
    pub fn allows_repair_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RepairPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(RepairPolicy::new(0).validate().is_err());
    }

    #[test]
    fn test_allows_repair_after() {
        let policy = RepairPolicy::new(3);
        assert!(policy.allows_repair_after(1));
        assert!(policy.allows_repair_after(2));
        assert!(!policy.allows_repair_after(3));
        assert!(!RepairPolicy::new(1).allows_repair_after(1));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let policy: RepairPolicy = toml::from_str("max_attempts = 5").expect("parse");
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.repair_timeout_ms, 120_000);
    }
}
