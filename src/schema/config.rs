//! Configuration types for Gray-Scott simulation parameters.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Seed;

/// Default tile size for the parallel decomposition.
///
/// Matches the GPU workgroup edge length; grid dimensions must be multiples of it.
pub const DEFAULT_TILE_SIZE: usize = 16;

/// Core simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Edge length of the square tiles the grid is decomposed into.
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    /// Reaction and diffusion constants.
    #[serde(default)]
    pub reaction: ReactionConfig,
}

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            reaction: ReactionConfig::default(),
        }
    }
}

/// Gray-Scott reaction constants.
///
/// Diffusion rates are given per 100 cells of grid area when
/// `area_scaled_diffusion` is set, so larger grids diffuse proportionally faster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionConfig {
    /// Time step size.
    pub dt: f32,
    /// Grid spacing used by the Laplacian.
    pub dx: f32,
    /// Feed rate (F).
    pub feed: f32,
    /// Kill rate (k).
    pub kill: f32,
    /// Diffusion coefficient of U.
    pub diffusion_u: f32,
    /// Diffusion coefficient of V.
    pub diffusion_v: f32,
    /// Multiply diffusion coefficients by `width * height / 100`.
    #[serde(default = "default_area_scaled")]
    pub area_scaled_diffusion: bool,
}

fn default_area_scaled() -> bool {
    true
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            dt: 0.5,
            dx: 2.0,
            feed: 0.012,
            kill: 0.052,
            diffusion_u: 0.0004,
            diffusion_v: 0.0002,
            area_scaled_diffusion: true,
        }
    }
}

impl SimulationConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::InvalidTileSize);
        }
        if !self.reaction.dt.is_finite() || self.reaction.dt <= 0.0 {
            return Err(ConfigError::InvalidTimeStep);
        }
        if !self.reaction.dx.is_finite() || self.reaction.dx <= 0.0 {
            return Err(ConfigError::InvalidSpacing);
        }
        Ok(())
    }

    /// Check grid dimensions against the tile decomposition.
    pub fn validate_grid(&self, width: usize, height: usize) -> Result<(), ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if width % self.tile_size != 0 || height % self.tile_size != 0 {
            return Err(ConfigError::MisalignedDimensions {
                width,
                height,
                tile_size: self.tile_size,
            });
        }
        grid_cells(width, height)?;
        Ok(())
    }
}

/// Number of cells in a `width` x `height` grid, rejecting overflow.
pub fn grid_cells(width: usize, height: usize) -> Result<usize, ConfigError> {
    width
        .checked_mul(height)
        .ok_or(ConfigError::GridTooLarge { width, height })
}

/// Which compute backend the driver should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

/// Configuration for a headless run of the frame driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Number of frames (steps) to run.
    pub frames: u64,
    /// Compute backend.
    #[serde(default)]
    pub backend: BackendKind,
    /// Report statistics every N frames (0 = every 10%).
    #[serde(default)]
    pub report_every: u64,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub seed: Seed,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            frames: 1000,
            backend: BackendKind::Cpu,
            report_every: 0,
            simulation: SimulationConfig::default(),
            seed: Seed::default(),
        }
    }
}

impl RunConfig {
    /// Load a run configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the run configuration, including grid alignment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        self.seed.validate()?;
        self.simulation.validate_grid(self.width, self.height)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions (width, height) must be non-zero")]
    InvalidDimensions,
    #[error("Grid {width}x{height} is not a multiple of the tile size {tile_size}")]
    MisalignedDimensions {
        width: usize,
        height: usize,
        tile_size: usize,
    },
    #[error("Grid {width}x{height} has more cells than fit in memory")]
    GridTooLarge { width: usize, height: usize },
    #[error("Grid size changed from {expected:?} to {actual:?}; reset before resizing")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Output buffer holds {actual} values, expected {expected}")]
    OutputBufferSize { expected: usize, actual: usize },
    #[error("Tile size must be non-zero")]
    InvalidTileSize,
    #[error("Time step must be positive")]
    InvalidTimeStep,
    #[error("Grid spacing must be positive")]
    InvalidSpacing,
    #[error("Perturbation amplitude must be finite and non-negative, got {0}")]
    InvalidPerturbation(f32),
    #[error("Patch range [{lo}, {hi}) must lie within [0, 1]")]
    InvalidPatch { lo: f32, hi: f32 },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
