//! Error types for the repair loop and its collaborators.

use uuid::Uuid;

use crate::domain::{ArtifactSet, EpisimError, RepairAttempt, ValidationReport};

/// The generation collaborator could not produce a first artifact set. Fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("artifact generation failed: {0}")]
    Failed(String),

    #[error("generated artifact set is invalid: {0}")]
    InvalidArtifacts(String),
}

/// The repair collaborator could not produce a replacement artifact set.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepairError {
    #[error("repair declined")]
    Declined,

    #[error("repair command failed: {0}")]
    Failed(String),

    #[error("repair command timed out after {0} ms")]
    Timeout(u64),

    #[error("repair returned an invalid artifact set: {0}")]
    InvalidResponse(String),
}

/// Everything a run produced before it ran out of attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedRun {
    pub run_id: Uuid,
    /// The last artifact set that was executed.
    pub artifacts: ArtifactSet,
    /// One report per execution, in attempt order.
    pub reports: Vec<ValidationReport>,
    pub repairs: Vec<RepairAttempt>,
    /// Set when the loop stopped early because the repair collaborator failed.
    pub repair_error: Option<String>,
}

impl ExhaustedRun {
    pub fn executions(&self) -> u32 {
        self.reports.len() as u32
    }

    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.reports.last()
    }
}

/// Run-level failures. Execution failures and missed tolerances never appear
/// here directly; they are recorded in reports and drive repair.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid model specification: {0}")]
    InvalidSpecification(EpisimError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("repair exhausted after {} execution(s)", .0.executions())]
    RepairExhausted(Box<ExhaustedRun>),

    #[error("validation run cancelled")]
    Cancelled,
}

impl RunError {
    /// History of an exhausted run, if this is one.
    pub fn exhausted(&self) -> Option<&ExhaustedRun> {
        match self {
            RunError::RepairExhausted(run) => Some(run),
            _ => None,
        }
    }
}
