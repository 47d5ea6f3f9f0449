//! Gray-Scott reaction-diffusion update.
//!
//! ```text
//! dU/dt = Du * lap(U) - U * V^2 + F * (1 - U)
//! dV/dt = Dv * lap(V) + U * V^2 - (F + k) * V
//! ```
//!
//! integrated with explicit Euler. Every cell reads only the previous step's
//! fields and writes into a separate buffer, so cells may be updated in any
//! order or in parallel.

use rayon::prelude::*;

use crate::schema::ReactionConfig;

use super::{ConcentrationFields, laplacian};

/// Reaction constants resolved for a particular grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionParams {
    pub dt: f32,
    pub dx: f32,
    pub feed: f32,
    pub kill: f32,
    /// Effective diffusion coefficient of U.
    pub du: f32,
    /// Effective diffusion coefficient of V.
    pub dv: f32,
}

impl ReactionParams {
    /// Resolve the configured constants for a `width` x `height` grid.
    pub fn resolve(config: &ReactionConfig, width: usize, height: usize) -> Self {
        let scale = if config.area_scaled_diffusion {
            (width as f64 * height as f64 / 100.0) as f32
        } else {
            1.0
        };
        Self {
            dt: config.dt,
            dx: config.dx,
            feed: config.feed,
            kill: config.kill,
            du: config.diffusion_u * scale,
            dv: config.diffusion_v * scale,
        }
    }

    /// Rates of change `(dU/dt, dV/dt)` for one cell.
    #[inline]
    pub fn rates(&self, u: f32, v: f32, lap_u: f32, lap_v: f32) -> (f32, f32) {
        let uvv = u * v * v;
        let du_dt = self.du * lap_u - uvv + self.feed * (1.0 - u);
        let dv_dt = self.dv * lap_v + uvv - (self.feed + self.kill) * v;
        (du_dt, dv_dt)
    }

    /// Largest time step for which explicit diffusion stays stable.
    ///
    /// Five-point stencil in 2D: `dt <= dx^2 / (4 * D)`.
    pub fn max_stable_dt(&self) -> f32 {
        let d = self.du.max(self.dv);
        if d <= 0.0 {
            f32::INFINITY
        } else {
            self.dx * self.dx / (4.0 * d)
        }
    }

    /// Check the configured time step against [`Self::max_stable_dt`].
    pub fn is_diffusion_stable(&self) -> bool {
        self.dt <= self.max_stable_dt()
    }
}

/// Advance one cell by one explicit Euler step, reading from `current`.
#[inline]
pub fn advance_cell(
    current: &ConcentrationFields,
    params: &ReactionParams,
    x: usize,
    y: usize,
) -> (f32, f32) {
    let width = current.width;
    let height = current.height;
    let i = y * width + x;
    let u = current.u[i];
    let v = current.v[i];

    let lap_u = laplacian(&current.u, width, height, x, y, params.dx);
    let lap_v = laplacian(&current.v, width, height, x, y, params.dx);
    let (du_dt, dv_dt) = params.rates(u, v, lap_u, lap_v);

    (u + params.dt * du_dt, v + params.dt * dv_dt)
}

/// Advance every cell of `current` into `next`.
///
/// `next` must have the same dimensions. Bands of `tile_rows` rows are
/// processed in parallel.
pub fn step_fields(
    current: &ConcentrationFields,
    next: &mut ConcentrationFields,
    params: &ReactionParams,
    tile_rows: usize,
) {
    debug_assert_eq!(current.width, next.width);
    debug_assert_eq!(current.height, next.height);

    let width = current.width;
    let band = width * tile_rows.max(1);

    next.u
        .par_chunks_mut(band)
        .zip(next.v.par_chunks_mut(band))
        .enumerate()
        .for_each(|(b, (next_u, next_v))| {
            let base = b * band;
            for (offset, (nu, nv)) in next_u.iter_mut().zip(next_v.iter_mut()).enumerate() {
                let i = base + offset;
                let (u, v) = advance_cell(current, params, i % width, i / width);
                *nu = u;
                *nv = v;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::initialize_fields;
    use crate::schema::Seed;

    fn params_for(width: usize, height: usize) -> ReactionParams {
        ReactionParams::resolve(&ReactionConfig::default(), width, height)
    }

    /// Sequential update that writes back into the fields it reads from.
    fn step_in_place(fields: &mut ConcentrationFields, params: &ReactionParams) {
        for y in 0..fields.height {
            for x in 0..fields.width {
                let (u, v) = advance_cell(fields, params, x, y);
                fields.set(x, y, u, v);
            }
        }
    }

    #[test]
    fn test_resolve_scales_with_area() {
        let params = params_for(100, 100);
        assert!((params.du - 0.04).abs() < 1e-7);
        assert!((params.dv - 0.02).abs() < 1e-7);
        assert_eq!(params.dt, 0.5);
        assert_eq!(params.dx, 2.0);

        let config = ReactionConfig {
            area_scaled_diffusion: false,
            ..Default::default()
        };
        let params = ReactionParams::resolve(&config, 100, 100);
        assert_eq!(params.du, 0.0004);
    }

    #[test]
    fn test_rates() {
        let params = ReactionParams {
            dt: 1.0,
            dx: 1.0,
            feed: 0.1,
            kill: 0.05,
            du: 2.0,
            dv: 1.0,
        };
        let (du, dv) = params.rates(0.5, 0.5, 1.0, -1.0);
        // 2*1 - 0.125 + 0.1*0.5
        assert!((du - 1.925).abs() < 1e-6);
        // 1*-1 + 0.125 - 0.15*0.5
        assert!((dv - (-0.95)).abs() < 1e-6);
    }

    #[test]
    fn test_flat_steady_state_is_fixed_point() {
        let width = 32;
        let height = 32;
        let current = ConcentrationFields::try_filled(width, height, 1.0, 0.0).unwrap();
        let mut next = ConcentrationFields::try_filled(width, height, 0.0, 0.0).unwrap();

        step_fields(&current, &mut next, &params_for(width, height), 16);

        assert_eq!(next, current);
    }

    #[test]
    fn test_uniform_fields_have_no_diffusion() {
        // Spatially uniform (U, V) evolves by reaction only.
        let width = 16;
        let height = 16;
        let params = params_for(width, height);
        let current = ConcentrationFields::try_filled(width, height, 0.5, 0.25).unwrap();
        let mut next = ConcentrationFields::try_filled(width, height, 0.0, 0.0).unwrap();

        step_fields(&current, &mut next, &params, 16);

        let (du, dv) = params.rates(0.5, 0.25, 0.0, 0.0);
        for i in 0..width * height {
            assert_eq!(next.u[i], 0.5 + params.dt * du);
            assert_eq!(next.v[i], 0.25 + params.dt * dv);
        }
    }

    #[test]
    fn test_single_cell_diffuses_symmetrically() {
        let width = 16;
        let height = 16;
        let params = params_for(width, height);
        let mut current = ConcentrationFields::try_filled(width, height, 1.0, 0.0).unwrap();
        current.set(8, 8, 1.0, 0.5);
        let mut next = ConcentrationFields::try_filled(width, height, 0.0, 0.0).unwrap();

        step_fields(&current, &mut next, &params, 16);

        let left = next.get(7, 8);
        let right = next.get(9, 8);
        let up = next.get(8, 7);
        let down = next.get(8, 9);
        assert_eq!(left, right);
        assert_eq!(up, down);
        assert_eq!(left, up);
        assert!(left.1 > 0.0, "V should diffuse into neighbors");
    }

    #[test]
    fn test_in_place_update_is_detectably_wrong() {
        // One distinguished pixel on a small grid.
        let width = 16;
        let height = 16;
        let params = params_for(width, height);
        let mut initial = ConcentrationFields::try_filled(width, height, 1.0, 0.0).unwrap();
        initial.set(5, 9, 0.5, 0.5);

        let mut reference = ConcentrationFields::try_filled(width, height, 0.0, 0.0).unwrap();
        step_fields(&initial, &mut reference, &params, 16);

        let mut hazardous = initial.clone();
        step_in_place(&mut hazardous, &params);

        assert_ne!(hazardous, reference);
        // The cell after the pixel in scan order saw the advanced value.
        assert_ne!(hazardous.get(6, 9), reference.get(6, 9));
        // The double-buffered step stays symmetric, the in-place one does not.
        assert_eq!(reference.get(4, 9), reference.get(6, 9));
        assert_ne!(hazardous.get(4, 9), hazardous.get(6, 9));
    }

    #[test]
    fn test_band_size_does_not_change_result() {
        let width = 64;
        let height = 64;
        let params = params_for(width, height);
        let current = initialize_fields(&Seed::deterministic(5), width, height).unwrap();

        let mut by_tile = ConcentrationFields::try_filled(width, height, 0.0, 0.0).unwrap();
        let mut by_row = by_tile.clone();
        step_fields(&current, &mut by_tile, &params, 16);
        step_fields(&current, &mut by_row, &params, 1);

        assert_eq!(by_tile, by_row);
    }

    #[test]
    fn test_stability_bound() {
        let params = params_for(64, 64);
        assert!(params.is_diffusion_stable());

        // Diffusion grows with area; a large enough grid outruns dt = 0.5.
        let params = params_for(2048, 2048);
        assert!(!params.is_diffusion_stable());
        assert!(params.max_stable_dt() < params.dt);
    }
}
