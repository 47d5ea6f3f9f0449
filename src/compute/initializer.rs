//! Initial concentration fields.
//!
//! The baseline is the trivial steady state `U = 1, V = 0`. A seeded pattern
//! disturbs it and a small multiplicative noise breaks the symmetry so that
//! patterns can form.

use std::ops::Range;

use rand::distributions::Uniform;
use rand::prelude::*;

use crate::schema::{ConfigError, Pattern, Seed};

use super::{BackendError, ConcentrationFields, SimulationError};

/// Build the fields for `seed` without perturbation.
pub fn seed_pattern(
    seed: &Seed,
    width: usize,
    height: usize,
) -> Result<ConcentrationFields, BackendError> {
    let mut fields = ConcentrationFields::try_filled(width, height, 1.0, 0.0)?;

    match &seed.pattern {
        Pattern::CentralPatch { lo, hi, u, v } => {
            let rows = fraction_range(*lo, *hi, height);
            let cols = fraction_range(*lo, *hi, width);
            for y in rows {
                for x in cols.clone() {
                    fields.set(x, y, *u, *v);
                }
            }
        }
        Pattern::Uniform => {}
        Pattern::Custom { values } => {
            for &(x, y, u, v) in values {
                if x < width && y < height {
                    fields.set(x, y, u, v);
                }
            }
        }
    }

    Ok(fields)
}

/// Scale every value below 1.0 by `1 + r`, `r` uniform in `[-amplitude, amplitude]`.
///
/// U and V draw independently. Results are not clamped, so a value near the
/// bounds may leave `[0, 1]`. `amplitude` must be finite and non-negative.
pub fn perturb<R: Rng + ?Sized>(
    fields: &mut ConcentrationFields,
    amplitude: f32,
    rng: &mut R,
) -> Result<(), ConfigError> {
    if !amplitude.is_finite() || amplitude < 0.0 {
        return Err(ConfigError::InvalidPerturbation(amplitude));
    }
    let dist = Uniform::new_inclusive(-amplitude, amplitude);

    for field in [&mut fields.u, &mut fields.v] {
        for value in field.iter_mut() {
            if *value < 1.0 {
                let r = dist.sample(rng);
                *value += *value * r;
            }
        }
    }
    Ok(())
}

/// Build the seeded, perturbed initial fields.
///
/// An invalid seed is a configuration error; failing to allocate the grid is a
/// resource error.
pub fn initialize_fields(
    seed: &Seed,
    width: usize,
    height: usize,
) -> Result<ConcentrationFields, SimulationError> {
    seed.validate()?;
    let mut fields = seed_pattern(seed, width, height).map_err(SimulationError::Resource)?;

    let mut rng = match seed.rng_seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    perturb(&mut fields, seed.perturbation, &mut rng)?;

    log::debug!(
        "Initialized {}x{} fields (rng seed: {:?})",
        width,
        height,
        seed.rng_seed
    );
    Ok(fields)
}

/// Indices `i` in `0..n` whose fractional position `i / n` lies in `[lo, hi)`.
fn fraction_range(lo: f32, hi: f32, n: usize) -> Range<usize> {
    let start = (lo as f64 * n as f64).ceil() as usize;
    let end = (hi as f64 * n as f64).ceil() as usize;
    start.min(n)..end.min(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_patch(i: usize, n: usize) -> bool {
        let f = i as f64;
        let n = n as f64;
        f >= 0.48f32 as f64 * n && f < 0.52f32 as f64 * n
    }

    #[test]
    fn test_fraction_range() {
        assert_eq!(fraction_range(0.48, 0.52, 64), 31..34);
        assert_eq!(fraction_range(0.48, 0.52, 100), 48..52);
        assert_eq!(fraction_range(0.0, 1.0, 16), 0..16);
        assert_eq!(fraction_range(0.5, 0.5, 16), 8..8);
    }

    #[test]
    fn test_unperturbed_pattern() {
        let width = 128;
        let height = 64;
        let fields = seed_pattern(&Seed::default(), width, height).unwrap();

        let mut patch_cells = 0;
        for y in 0..height {
            for x in 0..width {
                let (u, v) = fields.get(x, y);
                if in_patch(x, width) && in_patch(y, height) {
                    assert_eq!((u, v), (0.5, 0.25), "Patch cell ({}, {})", x, y);
                    patch_cells += 1;
                } else {
                    assert_eq!((u, v), (1.0, 0.0), "Baseline cell ({}, {})", x, y);
                }
            }
        }
        assert!(patch_cells > 0);
    }

    #[test]
    fn test_perturbation_bounds() {
        let width = 256;
        let height = 256;
        let fields = initialize_fields(&Seed::deterministic(42), width, height).unwrap();

        let eps = 1e-6;
        for y in 0..height {
            for x in 0..width {
                let (u, v) = fields.get(x, y);
                if in_patch(x, width) && in_patch(y, height) {
                    assert!((u - 0.5).abs() <= 0.005 + eps, "U = {} at ({}, {})", u, x, y);
                    assert!((v - 0.25).abs() <= 0.0025 + eps, "V = {} at ({}, {})", v, x, y);
                } else {
                    // 1.0 is never perturbed and 0.0 scales to itself
                    assert_eq!((u, v), (1.0, 0.0));
                }
            }
        }
    }

    #[test]
    fn test_perturbation_actually_varies_patch() {
        let fields = initialize_fields(&Seed::deterministic(3), 256, 256).unwrap();
        let distinct = fields
            .u
            .iter()
            .filter(|&&u| u < 1.0 && u != 0.5)
            .count();
        assert!(distinct > 0, "Perturbation left the patch untouched");
    }

    #[test]
    fn test_deterministic_seed() {
        let a = initialize_fields(&Seed::deterministic(7), 64, 64).unwrap();
        let b = initialize_fields(&Seed::deterministic(7), 64, 64).unwrap();
        let c = initialize_fields(&Seed::deterministic(8), 64, 64).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.u, c.u);
    }

    #[test]
    fn test_uniform_pattern_is_steady_state() {
        let seed = Seed {
            pattern: Pattern::Uniform,
            ..Seed::deterministic(1)
        };
        let fields = initialize_fields(&seed, 32, 32).unwrap();
        assert!(fields.u.iter().all(|&u| u == 1.0));
        assert!(fields.v.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_custom_pattern_ignores_out_of_bounds() {
        let seed = Seed {
            pattern: Pattern::Custom {
                values: vec![(1, 2, 0.3, 0.6), (99, 0, 0.0, 1.0)],
            },
            ..Seed::deterministic(1)
        };
        let fields = seed_pattern(&seed, 16, 16).unwrap();
        assert_eq!(fields.get(1, 2), (0.3, 0.6));
        assert_eq!(fields.u.iter().filter(|&&u| u != 1.0).count(), 1);
    }

    #[test]
    fn test_perturbation_is_unclamped() {
        // A value just below 1.0 can be pushed above it.
        let mut fields = ConcentrationFields::try_filled(16, 16, 0.9999, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        perturb(&mut fields, 0.01, &mut rng).unwrap();
        assert!(fields.u.iter().any(|&u| u > 1.0));
    }

    #[test]
    fn test_invalid_amplitude_is_rejected() {
        let mut fields = ConcentrationFields::try_filled(16, 16, 0.5, 0.25).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for amplitude in [-0.1, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                perturb(&mut fields, amplitude, &mut rng),
                Err(ConfigError::InvalidPerturbation(_))
            ));
        }
        assert!(fields.u.iter().all(|&u| u == 0.5));
    }

    #[test]
    fn test_initialize_fields_validates_seed() {
        let seed = Seed {
            perturbation: -1.0,
            ..Seed::deterministic(1)
        };
        assert!(matches!(
            initialize_fields(&seed, 16, 16),
            Err(SimulationError::Configuration(
                ConfigError::InvalidPerturbation(_)
            ))
        ));
    }
}
