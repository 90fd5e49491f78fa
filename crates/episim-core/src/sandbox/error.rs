//! Structured execution failures.
//!
//! These never escape the orchestrator as errors: each one is folded into a
//! failing [`ValidationReport`](crate::domain::ValidationReport) and handed to
//! the repair loop.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an execution produced no usable trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureKind {
    /// Wall-clock limit reached; the process tree was killed.
    Timeout,
    /// Non-zero exit, unparsable output, or the process could not be started.
    Crash,
    /// Output parsed but does not honor the entrypoint contract.
    ContractViolation,
}

impl fmt::Display for ExecutionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionFailureKind::Timeout => "timeout",
            ExecutionFailureKind::Crash => "crash",
            ExecutionFailureKind::ContractViolation => "contract_violation",
        };
        f.write_str(s)
    }
}

/// A failed sandbox execution, with whatever diagnostics were captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: ExecutionFailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionFailure {
    pub fn timeout(limit_ms: u64) -> Self {
        Self {
            kind: ExecutionFailureKind::Timeout,
            message: format!("execution exceeded {limit_ms}ms and was killed"),
            stderr: None,
            exit_code: None,
        }
    }

    pub fn crash(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            kind: ExecutionFailureKind::Crash,
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// The sandbox could not prepare or start the process.
    pub fn setup(message: impl fmt::Display) -> Self {
        Self::crash(format!("sandbox setup failed: {message}"), None, None)
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutionFailureKind::ContractViolation,
            message: message.into(),
            stderr: None,
            exit_code: None,
        }
    }

    /// Attach captured stderr, keeping any already present.
    pub fn with_stderr(mut self, stderr: String) -> Self {
        if self.stderr.is_none() && !stderr.is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}
