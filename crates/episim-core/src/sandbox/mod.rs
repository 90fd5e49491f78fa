//! Sandbox: isolated, time-bounded execution of untrusted artifact sets.
//!
//! Each execution materializes the artifact files into a fresh temporary
//! directory, launches the declared entrypoint as a child process in its own
//! process group, feeds it the model inputs as a JSON side-channel, and parses
//! its stdout into a [`Trajectory`](crate::domain::Trajectory). The child, any
//! processes it spawned, and the directory are reclaimed on every exit path.
//!
//! # Modules
//!
//! - [`config`]: `SandboxConfig` (timeout, spawn limit, env passthrough)
//! - [`error`]: `ExecutionFailure` / `ExecutionFailureKind`
//! - [`execution`]: `Sandbox` trait and the `ProcessSandbox` implementation
//! - [`output`]: stdout contract parsing and negative-value clamping
//! - [`process`]: process-group cleanup and capped pipe reads

pub mod config;
pub mod error;
pub mod execution;
pub mod output;
pub mod process;

pub use config::SandboxConfig;
pub use error::{ExecutionFailure, ExecutionFailureKind};
pub use execution::{ArtifactInput, ProcessSandbox, Sandbox, INPUT_ENV_VAR, INPUT_FILE_NAME};
pub use output::parse_trajectory;
