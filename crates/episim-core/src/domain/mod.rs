//! Domain models for the validation core.
//!
//! Canonical definitions for the core entities:
//! - `ModelSpecification`: immutable description of the model under test
//! - `ArtifactSet`: one candidate implementation, replaced wholesale on repair
//! - `Trajectory`: the parsed, clamped output of a single execution
//! - `ValidationReport`: per-attempt verdict, plus the `RepairAttempt` audit record

pub mod artifact;
pub mod digest;
pub mod error;
pub mod model_spec;
pub mod report;
pub mod trajectory;

pub use artifact::{ArtifactSet, Entrypoint};
pub use digest::sha256_hex;
pub use error::{EpisimError, Result};
pub use model_spec::{ExpectedResult, ModelSpecification, DEFAULT_SAMPLE_COUNT, DEFAULT_TOLERANCE};
pub use report::{MetricResult, MetricStatus, RepairAttempt, ValidationReport};
pub use trajectory::Trajectory;
