//! Simulation state - owns the fields across frames and drives stepping.
//!
//! Lifecycle: `Uninitialized -> Ready` on the first [`SimulationState::step`]
//! (or an explicit [`SimulationState::initialize`]), `Ready -> Ready` on every
//! later step. A resource or execution fault moves the state to `Faulted`,
//! after which no step runs until [`SimulationState::reset`].

use crate::schema::{ConfigError, Seed, SimulationConfig, grid_cells};

use super::{
    BackendError, ComputeBackend, ConcentrationFields, CpuBackend, ReactionParams,
    SimulationStats, initialize_fields, try_filled_vec,
};

/// Lifecycle phase of a [`SimulationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No fields allocated yet.
    Uninitialized,
    /// Fields loaded; stepping allowed.
    Ready,
    /// A step or allocation failed; stepping refused until reset.
    Faulted,
}

/// Errors returned by simulation operations.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Resource error: {0}")]
    Resource(#[source] BackendError),

    #[error("Execution fault at step {step}: {source}")]
    ExecutionFault {
        step: u64,
        #[source]
        source: BackendError,
    },

    #[error("Simulation halted after an earlier fault; reset to continue")]
    Halted,

    #[error("Simulation is already initialized; reset before re-initializing")]
    AlreadyInitialized,

    #[error("Simulation has not been initialized")]
    NotInitialized,
}

/// Persistent Gray-Scott simulation.
///
/// Exclusively owns the concentration fields (through its backend) from
/// initialization until reset or drop.
pub struct SimulationState<B: ComputeBackend = CpuBackend> {
    config: SimulationConfig,
    seed: Seed,
    backend: B,
    phase: Phase,
    dimensions: Option<(usize, usize)>,
    params: Option<ReactionParams>,
    steps: u64,
    time: f32,
}

impl SimulationState<CpuBackend> {
    /// Create a CPU-backed simulation.
    pub fn new(config: SimulationConfig, seed: Seed) -> Self {
        Self::with_backend(config, seed, CpuBackend::new())
    }
}

impl<B: ComputeBackend> SimulationState<B> {
    /// Create a simulation on the given backend.
    ///
    /// Nothing is allocated until the first step.
    pub fn with_backend(config: SimulationConfig, seed: Seed, backend: B) -> Self {
        Self {
            config,
            seed,
            backend,
            phase: Phase::Uninitialized,
            dimensions: None,
            params: None,
            steps: 0,
            time: 0.0,
        }
    }

    /// Allocate and seed the fields for a `width` x `height` grid.
    pub fn initialize(&mut self, width: usize, height: usize) -> Result<(), SimulationError> {
        match self.phase {
            Phase::Uninitialized => {}
            Phase::Ready => return Err(SimulationError::AlreadyInitialized),
            Phase::Faulted => return Err(SimulationError::Halted),
        }

        self.config.validate()?;
        self.seed.validate()?;
        self.config.validate_grid(width, height)?;

        let params = ReactionParams::resolve(&self.config.reaction, width, height);
        if !params.is_diffusion_stable() {
            log::warn!(
                "dt = {} exceeds the diffusion stability limit {} for a {}x{} grid",
                params.dt,
                params.max_stable_dt(),
                width,
                height
            );
        }

        let fields = match initialize_fields(&self.seed, width, height) {
            Ok(fields) => fields,
            Err(SimulationError::Resource(e)) => {
                return Err(self.resource_fault(width, height, e));
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.backend.load(fields, params, self.config.tile_size) {
            return Err(self.resource_fault(width, height, e));
        }

        log::info!(
            "Initialized {}x{} Gray-Scott grid on {} backend (Du = {}, Dv = {})",
            width,
            height,
            self.backend.name(),
            params.du,
            params.dv
        );

        self.dimensions = Some((width, height));
        self.params = Some(params);
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Advance one frame and copy the U field into `output`.
    ///
    /// Initializes on the first call. `width` and `height` must match every
    /// earlier call, and `output` must hold `width * height` values.
    pub fn step(
        &mut self,
        width: usize,
        height: usize,
        output: &mut [f32],
    ) -> Result<(), SimulationError> {
        match self.phase {
            Phase::Faulted => return Err(SimulationError::Halted),
            Phase::Ready => {
                let expected = self.dimensions.ok_or(SimulationError::NotInitialized)?;
                if expected != (width, height) {
                    return Err(ConfigError::DimensionMismatch {
                        expected,
                        actual: (width, height),
                    }
                    .into());
                }
                check_output_len(width, height, output)?;
            }
            Phase::Uninitialized => {
                self.config.validate()?;
                self.config.validate_grid(width, height)?;
                check_output_len(width, height, output)?;
                self.initialize(width, height)?;
            }
        }

        let step = self.steps + 1;
        if let Err(source) = self.backend.step() {
            return Err(self.fault(step, source));
        }
        if let Err(source) = self.backend.read_u(output) {
            return Err(self.fault(step, source));
        }

        self.steps = step;
        self.time += self.params.map_or(0.0, |p| p.dt);
        log::trace!("Step {} complete", step);
        Ok(())
    }

    /// Run `frames` steps, discarding intermediate output.
    pub fn run(&mut self, width: usize, height: usize, frames: u64) -> Result<(), SimulationError> {
        self.config.validate()?;
        self.config.validate_grid(width, height)?;
        let mut output =
            try_filled_vec(grid_cells(width, height)?, 0.0).map_err(SimulationError::Resource)?;
        for _ in 0..frames {
            self.step(width, height, &mut output)?;
        }
        Ok(())
    }

    /// Release the fields and return to `Uninitialized`.
    ///
    /// The next step re-seeds the grid and may use new dimensions.
    pub fn reset(&mut self) {
        self.backend.release();
        self.phase = Phase::Uninitialized;
        self.dimensions = None;
        self.params = None;
        self.steps = 0;
        self.time = 0.0;
        log::debug!("Simulation reset");
    }

    /// Copy both current fields out of the backend.
    pub fn snapshot(&mut self) -> Result<ConcentrationFields, SimulationError> {
        match self.phase {
            Phase::Ready => {}
            Phase::Uninitialized => return Err(SimulationError::NotInitialized),
            Phase::Faulted => return Err(SimulationError::Halted),
        }
        let step = self.steps;
        self.backend
            .snapshot()
            .map_err(|source| SimulationError::ExecutionFault { step, source })
    }

    /// Statistics of the current fields.
    pub fn stats(&mut self) -> Result<SimulationStats, SimulationError> {
        Ok(SimulationStats::from_fields(&self.snapshot()?))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Grid dimensions, once initialized.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.dimensions
    }

    /// Reaction constants resolved for the current grid.
    pub fn params(&self) -> Option<&ReactionParams> {
        self.params.as_ref()
    }

    /// Number of completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Simulated time (`steps * dt`).
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn resource_fault(
        &mut self,
        width: usize,
        height: usize,
        source: BackendError,
    ) -> SimulationError {
        log::error!("Failed to allocate {}x{} fields: {}", width, height, source);
        self.phase = Phase::Faulted;
        SimulationError::Resource(source)
    }

    fn fault(&mut self, step: u64, source: BackendError) -> SimulationError {
        log::error!("Step {} failed, halting simulation: {}", step, source);
        self.phase = Phase::Faulted;
        SimulationError::ExecutionFault { step, source }
    }
}

fn check_output_len(width: usize, height: usize, output: &[f32]) -> Result<(), ConfigError> {
    let expected = grid_cells(width, height)?;
    if output.len() != expected {
        return Err(ConfigError::OutputBufferSize {
            expected,
            actual: output.len(),
        });
    }
    Ok(())
}
