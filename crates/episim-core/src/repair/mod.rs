//! Bounded repair loop.
//!
//! - [`policy`]: `RepairPolicy` (attempt budget, repair command timeout)
//! - [`collaborator`]: `ArtifactGenerator` / `ArtifactRepairer` seams and ready implementations
//! - [`orchestrator`]: `Orchestrator`: execute, evaluate, repair; at most `max_attempts` executions
//! - [`error`]: `GenerationError`, `RepairError`, `RunError`

pub mod collaborator;
pub mod error;
pub mod orchestrator;
pub mod policy;

pub use collaborator::{
    ArtifactGenerator, ArtifactRepairer, CommandRepairer, DirectoryGenerator, NoRepair,
    RepairRequest, StaticGenerator,
};
pub use error::{ExhaustedRun, GenerationError, RepairError, RunError};
pub use orchestrator::{Orchestrator, RunState, ValidatedRun};
pub use policy::RepairPolicy;
