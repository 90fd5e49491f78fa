//! Metric registry and comparator.
//!
//! - [`config`]: `MetricConfig` (compartment roles, thresholds, unverifiable policy)
//! - [`registry`]: `Metric` trait, the six built-in metrics, `MetricRegistry`
//! - [`comparator`]: `Comparator::evaluate()`, trajectory and model specification to `ValidationReport`
//! - [`expr`]: closed-form expression evaluation for declared R0 formulas

pub mod comparator;
pub mod config;
pub mod expr;
pub mod registry;

pub use comparator::{compare, evaluate, Comparator};
pub use config::{MetricConfig, UnverifiablePolicy};
pub use registry::{BuiltinMetric, Metric, MetricContext, MetricRegistry, NotComputable};
