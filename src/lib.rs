//! Gray-Scott reaction-diffusion on a periodic grid.
//!
//! Two chemical species U and V react (`U + 2V -> 3V`) and diffuse on a
//! toroidal grid. Each frame advances both concentration fields by one
//! explicit Euler step and hands the U field to the caller for display.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and seeding for simulations
//! - `compute`: Numerical computation (initializer, Laplacian, stepper, backends)
//!
//! # Example
//!
//! ```rust,no_run
//! use gray_scott::{
//!     schema::{Seed, SimulationConfig},
//!     compute::SimulationState,
//! };
//!
//! let mut state = SimulationState::new(SimulationConfig::default(), Seed::deterministic(42));
//!
//! // One buffer per frame, filled with the U field
//! let (width, height) = (256, 256);
//! let mut frame = vec![0.0f32; width * height];
//! for _ in 0..100 {
//!     state.step(width, height, &mut frame)?;
//! }
//!
//! println!("Mean U after 100 steps: {}", state.stats()?.mean_u);
//! # Ok::<(), gray_scott::compute::SimulationError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{
    ComputeBackend, ConcentrationFields, CpuBackend, Phase, SimulationError, SimulationState,
    SimulationStats,
};
pub use schema::{Pattern, RunConfig, Seed, SimulationConfig};
