//! Schema module - Configuration and seeding types for Gray-Scott simulations.

mod config;
mod seed;

pub use config::*;
pub use seed::*;
