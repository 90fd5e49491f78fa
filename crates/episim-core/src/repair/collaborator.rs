//! Generation and repair collaborators.
//!
//! Both are stateless request/response seams: the orchestrator hands over
//! everything a collaborator needs and expects a complete artifact set back.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::error::{GenerationError, RepairError};
use crate::domain::{ArtifactSet, Entrypoint, EpisimError, ModelSpecification, ValidationReport};

/// Produces the first candidate artifact set for a specification.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, spec: &ModelSpecification) -> Result<ArtifactSet, GenerationError>;
}

/// Produces a complete replacement for an artifact set that failed validation.
#[async_trait]
pub trait ArtifactRepairer: Send + Sync {
    async fn repair(
        &self,
        spec: &ModelSpecification,
        artifacts: &ArtifactSet,
        report: &ValidationReport,
    ) -> Result<ArtifactSet, RepairError>;
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Hands out a fixed artifact set.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    artifacts: ArtifactSet,
}

impl StaticGenerator {
    pub fn new(artifacts: ArtifactSet) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl ArtifactGenerator for StaticGenerator {
    async fn generate(&self, _spec: &ModelSpecification) -> Result<ArtifactSet, GenerationError> {
        self.artifacts
            .validate()
            .map_err(|e| GenerationError::InvalidArtifacts(e.to_string()))?;
        Ok(self.artifacts.clone())
    }
}

/// Loads every file under a directory as the artifact set.
#[derive(Debug, Clone)]
pub struct DirectoryGenerator {
    dir: PathBuf,
    entrypoint: Entrypoint,
}

impl DirectoryGenerator {
    pub fn new(dir: impl Into<PathBuf>, entrypoint: Entrypoint) -> Self {
        Self {
            dir: dir.into(),
            entrypoint,
        }
    }
}

#[async_trait]
impl ArtifactGenerator for DirectoryGenerator {
    async fn generate(&self, spec: &ModelSpecification) -> Result<ArtifactSet, GenerationError> {
        ArtifactSet::from_directory(spec.name.clone(), &self.dir, self.entrypoint.clone()).map_err(
            |e| match e {
                EpisimError::InvalidArtifactSet(msg) => GenerationError::InvalidArtifacts(msg),
                other => GenerationError::Failed(format!("{}: {other}", self.dir.display())),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Repairers
// ---------------------------------------------------------------------------

/// Declines every repair, so a run gets exactly one execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepair;

#[async_trait]
impl ArtifactRepairer for NoRepair {
    async fn repair(
        &self,
        _spec: &ModelSpecification,
        _artifacts: &ArtifactSet,
        _report: &ValidationReport,
    ) -> Result<ArtifactSet, RepairError> {
        Err(RepairError::Declined)
    }
}

/// Request document sent to an external repair command on stdin.
#[derive(Debug, Serialize)]
pub struct RepairRequest<'a> {
    pub spec: &'a ModelSpecification,
    pub artifacts: &'a ArtifactSet,
    pub report: &'a ValidationReport,
}

/// Runs an external command that reads a [`RepairRequest`] as JSON on stdin
/// and prints the complete replacement [`ArtifactSet`] as JSON on stdout.
///
/// The command is killed if it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct CommandRepairer {
    command: Entrypoint,
    timeout: Duration,
}

impl CommandRepairer {
    pub fn new(command: Entrypoint, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl ArtifactRepairer for CommandRepairer {
    async fn repair(
        &self,
        spec: &ModelSpecification,
        artifacts: &ArtifactSet,
        report: &ValidationReport,
    ) -> Result<ArtifactSet, RepairError> {
        let request = serde_json::to_vec(&RepairRequest {
            spec,
            artifacts,
            report,
        })
        .map_err(|e| RepairError::Failed(format!("serialize repair request: {e}")))?;

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RepairError::Failed(format!("failed to start `{}`: {e}", self.command.program))
            })?;

        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request).await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                writer.abort();
                return Err(RepairError::Failed(format!(
                    "failed to wait for repair command: {e}"
                )));
            }
            Err(_) => {
                writer.abort();
                return Err(RepairError::Timeout(self.timeout.as_millis() as u64));
            }
        };
        if let Ok(Err(e)) = writer.await {
            debug!(error = %e, "repair command did not consume its request");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RepairError::Failed(match output.status.code() {
                Some(code) => format!("exited with code {code}: {}", stderr.trim()),
                None => format!("terminated by a signal: {}", stderr.trim()),
            }));
        }

        let replacement: ArtifactSet = serde_json::from_slice(&output.stdout)
            .map_err(|e| RepairError::InvalidResponse(e.to_string()))?;
        replacement
            .validate()
            .map_err(|e| RepairError::InvalidResponse(e.to_string()))?;
        Ok(replacement)
    }
}
