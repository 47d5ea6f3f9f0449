//! Seed types for initializing Gray-Scott simulations.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default half-width of the multiplicative perturbation draw.
pub const DEFAULT_PERTURBATION: f32 = 0.01;

/// Complete seed specification for simulation initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    /// Pattern written over the `U = 1, V = 0` baseline.
    pub pattern: Pattern,
    /// Each sub-unity value is scaled by `1 + r`, `r` uniform in `[-perturbation, perturbation]`.
    #[serde(default = "default_perturbation")]
    pub perturbation: f32,
    /// Random seed. `None` draws a fresh seed from OS entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_perturbation() -> f32 {
    DEFAULT_PERTURBATION
}

impl Default for Seed {
    fn default() -> Self {
        Self {
            pattern: Pattern::default(),
            perturbation: DEFAULT_PERTURBATION,
            rng_seed: None,
        }
    }
}

impl Seed {
    /// Seed with a fixed random seed, for reproducible runs.
    pub fn deterministic(rng_seed: u64) -> Self {
        Self {
            rng_seed: Some(rng_seed),
            ..Default::default()
        }
    }

    /// Validate seed parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.perturbation.is_finite() || self.perturbation < 0.0 {
            return Err(ConfigError::InvalidPerturbation(self.perturbation));
        }
        if let Pattern::CentralPatch { lo, hi, .. } = self.pattern {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                return Err(ConfigError::InvalidPatch { lo, hi });
            }
        }
        Ok(())
    }
}

/// Predefined patterns for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    /// Square patch in the middle of the grid.
    ///
    /// Covers the rows and columns whose fractional position lies in `[lo, hi)`.
    CentralPatch {
        lo: f32,
        hi: f32,
        /// U concentration inside the patch.
        u: f32,
        /// V concentration inside the patch.
        v: f32,
    },
    /// Flat steady state (U = 1, V = 0 everywhere).
    Uniform,
    /// Custom grid values (sparse representation).
    Custom {
        /// List of (x, y, u, v) entries.
        values: Vec<(usize, usize, f32, f32)>,
    },
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::CentralPatch {
            lo: 0.48,
            hi: 0.52,
            u: 0.5,
            v: 0.25,
        }
    }
}
