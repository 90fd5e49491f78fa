//! Parsed simulation output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Time series of every compartment produced by one execution.
///
/// Stored column-wise: `series[i]` belongs to `compartments[i]` and has one
/// value per entry of `times`. All values are nonnegative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub compartments: Vec<String>,
    pub series: Vec<Vec<f64>>,
    /// Negative samples raised to zero at the sandbox boundary.
    #[serde(default)]
    pub clamped_samples: usize,
}

impl Trajectory {
    /// Build a trajectory, raising every negative sample to zero.
    ///
    /// Callers guarantee `series.len() == compartments.len()` and that every
    /// series has `times.len()` entries.
    pub fn clamped(times: Vec<f64>, compartments: Vec<String>, mut series: Vec<Vec<f64>>) -> Self {
        let mut clamped_samples = 0;
        for value in series.iter_mut().flatten() {
            if *value < 0.0 {
                *value = 0.0;
                clamped_samples += 1;
            }
        }
        Self {
            times,
            compartments,
            series,
            clamped_samples,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The series for `compartment`, if present.
    pub fn series(&self, compartment: &str) -> Option<&[f64]> {
        self.compartments
            .iter()
            .position(|c| c == compartment)
            .and_then(|i| self.series.get(i))
            .map(Vec::as_slice)
    }

    /// Every compartment's value at sample `index`.
    pub fn sample(&self, index: usize) -> Option<BTreeMap<String, f64>> {
        if index >= self.times.len() {
            return None;
        }
        Some(
            self.compartments
                .iter()
                .zip(&self.series)
                .filter_map(|(name, values)| values.get(index).map(|v| (name.clone(), *v)))
                .collect(),
        )
    }
}
