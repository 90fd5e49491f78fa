//! Process-backed sandbox execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::config::SandboxConfig;
use super::error::ExecutionFailure;
use super::output::parse_trajectory;
use super::process::{read_capped, ProcessGroupGuard};
use crate::domain::{ArtifactSet, ModelSpecification, Trajectory};

/// File written into the working directory with the model inputs.
pub const INPUT_FILE_NAME: &str = "episim_input.json";

/// Environment variable holding the absolute path of [`INPUT_FILE_NAME`].
pub const INPUT_ENV_VAR: &str = "EPISIM_INPUT";

/// Runs an artifact set and returns its trajectory.
///
/// Implementations must reclaim every process and file they create before
/// returning, and when the returned future is dropped.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(
        &self,
        artifacts: &ArtifactSet,
        spec: &ModelSpecification,
        timeout: Duration,
    ) -> Result<Trajectory, ExecutionFailure>;
}

/// Input document handed to the entrypoint on stdin and in [`INPUT_FILE_NAME`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactInput {
    pub compartments: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    /// Initial values in `compartments` order.
    pub initial_conditions: Vec<f64>,
    pub t_span: [f64; 2],
    pub sample_count: usize,
    pub population: f64,
}

impl ArtifactInput {
    pub fn from_spec(spec: &ModelSpecification) -> Self {
        Self {
            compartments: spec.compartments.clone(),
            parameters: spec.parameters.clone(),
            initial_conditions: spec.initial_vector(),
            t_span: [0.0, spec.simulation_horizon],
            sample_count: spec.sample_count,
            population: spec.population,
        }
    }
}

/// Sandbox that runs each artifact set as a child process in a temporary directory.
///
/// Cloning shares the spawn limit, so every run driven through clones of one
/// `ProcessSandbox` competes for the same `max_concurrent_processes` permits.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_processes.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Spawn permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(artifact = %artifacts.name, timeout_ms = timeout.as_millis() as u64))]
    async fn execute(
        &self,
        artifacts: &ArtifactSet,
        spec: &ModelSpecification,
        timeout: Duration,
    ) -> Result<Trajectory, ExecutionFailure> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(ExecutionFailure::setup)?;

        let workdir = tempfile::Builder::new()
            .prefix("episim-")
            .tempdir()
            .map_err(ExecutionFailure::setup)?;
        artifacts
            .materialize(workdir.path())
            .map_err(ExecutionFailure::setup)?;

        let input = serde_json::to_vec(&ArtifactInput::from_spec(spec))
            .map_err(ExecutionFailure::setup)?;
        let input_path = workdir.path().join(INPUT_FILE_NAME);
        std::fs::write(&input_path, &input).map_err(ExecutionFailure::setup)?;

        let program = resolve_program(&artifacts.entrypoint.program, workdir.path())?;
        let mut cmd = Command::new(&program);
        cmd.args(&artifacts.entrypoint.args)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.config.passthrough_env {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env(INPUT_ENV_VAR, &input_path);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            ExecutionFailure::crash(
                format!("failed to start `{}`: {e}", program.display()),
                None,
                None,
            )
        })?;
        let group = ProcessGroupGuard::new(child.id());
        debug!(pid = ?child.id(), program = %program.display(), "artifact started");

        let limit = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), limit));
        let stdin = child.stdin.take();

        let run = async {
            if let Some(mut stdin) = stdin {
                // The artifact may legitimately ignore stdin and exit early.
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "artifact did not consume stdin");
                }
            }
            child.wait().await
        };

        let status = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionFailure::crash(
                    format!("failed to wait for artifact: {e}"),
                    None,
                    None,
                ));
            }
            Err(_) => {
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, "artifact timed out");
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionFailure::timeout(timeout.as_millis() as u64));
            }
        };

        // Reap stragglers before draining pipes they might still hold open.
        drop(group);

        let stdout = stdout_task
            .await
            .map_err(ExecutionFailure::setup)?
            .map_err(ExecutionFailure::setup)?;
        let stderr = stderr_task
            .await
            .map_err(ExecutionFailure::setup)?
            .map_err(ExecutionFailure::setup)?
            .lossy();

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = ?status.code(),
            stdout_bytes = stdout.bytes.len(),
            "artifact finished"
        );

        if !status.success() {
            return Err(ExecutionFailure::crash(
                format!("entrypoint {}", describe_status(status)),
                Some(stderr),
                status.code(),
            ));
        }
        if stdout.truncated {
            return Err(ExecutionFailure::crash(
                format!("output exceeded {limit} bytes"),
                Some(stderr),
                status.code(),
            ));
        }

        let trajectory = parse_trajectory(&stdout.bytes, &spec.compartments)
            .map_err(|f| f.with_stderr(stderr).with_exit_code(status.code()))?;
        if trajectory.clamped_samples > 0 {
            debug!(clamped = trajectory.clamped_samples, "negative samples clamped to zero");
        }
        Ok(trajectory)
    }
}

/// Programs with a path separator refer to files inside the working directory.
fn resolve_program(program: &str, workdir: &Path) -> Result<PathBuf, ExecutionFailure> {
    let path = Path::new(program);
    if path.is_absolute() || !program.contains('/') {
        return Ok(path.to_path_buf());
    }

    let resolved = workdir.join(path);
    if !resolved.starts_with(workdir) || program.split('/').any(|seg| seg == "..") {
        return Err(ExecutionFailure::setup(format!(
            "entrypoint `{program}` escapes the working directory"
        )));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if resolved.is_file() {
            std::fs::set_permissions(&resolved, std::fs::Permissions::from_mode(0o755))
                .map_err(ExecutionFailure::setup)?;
        }
    }
    Ok(resolved)
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}
