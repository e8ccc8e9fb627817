use serde::{Deserialize, Serialize};

use crate::basis::SvdMethod;

// ---------------------------------------------------------------------------
// Randomized SVD tuning
// ---------------------------------------------------------------------------

/// Knobs for the randomized range finder used by [`SvdMethod::Randomized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomizedSvdOptions {
    /// Extra sketch columns beyond the requested rank.
    pub oversamples: usize,
    /// Number of power iterations. `None` picks 7 for ranks below a tenth of
    /// the smaller matrix dimension and 4 otherwise.
    pub power_iterations: Option<usize>,
    /// Seed of the Gaussian test matrix.
    pub seed: u64,
}

impl Default for RandomizedSvdOptions {
    fn default() -> Self {
        Self {
            oversamples: 10,
            power_iterations: None,
            seed: 0,
        }
    }
}

impl RandomizedSvdOptions {
    pub fn power_iterations_for(&self, rank: usize, min_dim: usize) -> usize {
        self.power_iterations
            .unwrap_or(if (rank as f64) < 0.1 * min_dim as f64 { 7 } else { 4 })
    }
}

// ---------------------------------------------------------------------------
// Basis generation run
// ---------------------------------------------------------------------------

/// How the two polarizations are arranged into training matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixLayout {
    /// `h_plus` rows followed by `h_cross` rows; one shared basis.
    #[default]
    Stacked,
    /// One training matrix and one basis per polarization.
    PerPolarization,
}

/// Parameters of a [`generate_and_save_reduced_basis`](crate::driver::generate_and_save_reduced_basis) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasisGenerationSettings {
    /// Number of samples drawn from the dataset (capped at its size).
    pub num_samples: usize,
    /// Worker threads for sample evaluation; 0 runs on the calling thread.
    pub num_workers: usize,
    /// Basis rank; 0 keeps every singular vector.
    pub rank: usize,
    /// SVD method. `None` picks randomized for large training matrices.
    pub method: Option<SvdMethod>,
    pub layout: MatrixLayout,
    /// Appended to output file stems to tell basis variants apart.
    pub suffix: String,
    /// Seed of the sample draw.
    pub seed: u64,
    pub randomized: RandomizedSvdOptions,
}

impl Default for BasisGenerationSettings {
    fn default() -> Self {
        Self {
            num_samples: 50_000,
            num_workers: 0,
            rank: 1000,
            method: None,
            layout: MatrixLayout::Stacked,
            suffix: String::new(),
            seed: 0,
            randomized: RandomizedSvdOptions::default(),
        }
    }
}
