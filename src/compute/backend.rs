//! Compute backends.
//!
//! A backend owns the compute-resident copy of the fields. Local fields are
//! handed over with [`ComputeBackend::load`], advanced in place with
//! [`ComputeBackend::step`] and copied back out with
//! [`ComputeBackend::read_u`] or [`ComputeBackend::snapshot`].

use super::gpu::GpuError;
use super::{ConcentrationFields, ReactionParams, step_fields, try_filled_vec};

/// Errors reported by a compute backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to allocate {bytes} bytes: {reason}")]
    Allocation { bytes: usize, reason: String },

    #[error("Step execution failed: {0}")]
    Execution(String),

    #[error("Backend has no fields loaded")]
    NotLoaded,

    #[error("Tile size {requested} is not supported (backend requires {supported})")]
    UnsupportedTileSize { requested: usize, supported: usize },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Resident storage and parallel execution of the per-cell update.
pub trait ComputeBackend {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Take ownership of `fields` as the resident state.
    ///
    /// Replaces anything loaded before.
    fn load(
        &mut self,
        fields: ConcentrationFields,
        params: ReactionParams,
        tile_size: usize,
    ) -> Result<(), BackendError>;

    /// Advance the resident fields by one step.
    ///
    /// Returns only after every cell has been written.
    fn step(&mut self) -> Result<(), BackendError>;

    /// Copy the current U field into `out`.
    fn read_u(&mut self, out: &mut [f32]) -> Result<(), BackendError>;

    /// Copy both current fields back to local memory.
    fn snapshot(&mut self) -> Result<ConcentrationFields, BackendError>;

    /// Drop the resident fields.
    fn release(&mut self);
}

/// Double-buffered fields resident in host memory.
struct CpuBuffers {
    current: ConcentrationFields,
    next: ConcentrationFields,
    params: ReactionParams,
    tile_size: usize,
}

/// CPU backend, parallel over bands of tile rows with rayon.
#[derive(Default)]
pub struct CpuBackend {
    buffers: Option<CpuBuffers>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn load(
        &mut self,
        fields: ConcentrationFields,
        params: ReactionParams,
        tile_size: usize,
    ) -> Result<(), BackendError> {
        let len = fields.grid_size();
        let next = ConcentrationFields {
            width: fields.width,
            height: fields.height,
            u: try_filled_vec(len, 0.0)?,
            v: try_filled_vec(len, 0.0)?,
        };
        self.buffers = Some(CpuBuffers {
            current: fields,
            next,
            params,
            tile_size,
        });
        Ok(())
    }

    fn step(&mut self) -> Result<(), BackendError> {
        let buffers = self.buffers.as_mut().ok_or(BackendError::NotLoaded)?;
        step_fields(
            &buffers.current,
            &mut buffers.next,
            &buffers.params,
            buffers.tile_size,
        );
        // Swap buffers (no allocation, just pointer swap)
        std::mem::swap(&mut buffers.current, &mut buffers.next);
        Ok(())
    }

    fn read_u(&mut self, out: &mut [f32]) -> Result<(), BackendError> {
        let buffers = self.buffers.as_ref().ok_or(BackendError::NotLoaded)?;
        out.copy_from_slice(&buffers.current.u);
        Ok(())
    }

    fn snapshot(&mut self) -> Result<ConcentrationFields, BackendError> {
        let buffers = self.buffers.as_ref().ok_or(BackendError::NotLoaded)?;
        Ok(buffers.current.clone())
    }

    fn release(&mut self) {
        self.buffers = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ReactionConfig;

    fn loaded_backend(fields: ConcentrationFields) -> CpuBackend {
        let params = ReactionParams::resolve(&ReactionConfig::default(), fields.width, fields.height);
        let mut backend = CpuBackend::new();
        backend.load(fields, params, 16).unwrap();
        backend
    }

    #[test]
    fn test_unloaded_backend_errors() {
        let mut backend = CpuBackend::new();
        let mut out = vec![0.0f32; 4];
        assert!(matches!(backend.step(), Err(BackendError::NotLoaded)));
        assert!(matches!(
            backend.read_u(&mut out),
            Err(BackendError::NotLoaded)
        ));
        assert!(matches!(backend.snapshot(), Err(BackendError::NotLoaded)));
    }

    #[test]
    fn test_step_matches_step_fields() {
        let mut fields = ConcentrationFields::try_filled(32, 16, 1.0, 0.0).unwrap();
        fields.set(10, 4, 0.5, 0.25);
        let params = ReactionParams::resolve(&ReactionConfig::default(), 32, 16);

        let mut expected = fields.clone();
        step_fields(&fields, &mut expected, &params, 16);

        let mut backend = loaded_backend(fields);
        backend.step().unwrap();
        assert_eq!(backend.snapshot().unwrap(), expected);

        let mut out = vec![0.0f32; 32 * 16];
        backend.read_u(&mut out).unwrap();
        assert_eq!(out, expected.u);
    }

    #[test]
    fn test_release_drops_fields() {
        let fields = ConcentrationFields::try_filled(16, 16, 1.0, 0.0).unwrap();
        let mut backend = loaded_backend(fields);
        backend.release();
        assert!(matches!(backend.step(), Err(BackendError::NotLoaded)));
    }
}
