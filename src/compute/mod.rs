//! Compute module - Numerical integration for Gray-Scott.

mod backend;
mod fields;
mod initializer;
mod laplacian;
mod reaction;
mod state;

pub mod gpu;

pub use backend::*;
pub use fields::*;
pub use initializer::*;
pub use laplacian::*;
pub use reaction::*;
pub use state::*;
