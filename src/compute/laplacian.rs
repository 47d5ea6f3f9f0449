//! Discrete Laplacian with periodic boundaries.
//!
//! Five-point stencil: `(right + left + up + down - 4 * center) / dx^2`.

use rayon::prelude::*;

/// Laplacian of `field` at (x, y).
///
/// Each neighbor wraps its own axis, so the last column's right neighbor is
/// column 0 and the first row's upper neighbor is the last row.
#[inline]
pub fn laplacian(field: &[f32], width: usize, height: usize, x: usize, y: usize, dx: f32) -> f32 {
    let x_prev = (x + width - 1) % width;
    let x_next = (x + 1) % width;
    let y_prev = (y + height - 1) % height;
    let y_next = (y + 1) % height;

    let row = y * width;
    let center = field[row + x];
    let left = field[row + x_prev];
    let right = field[row + x_next];
    let up = field[y_prev * width + x];
    let down = field[y_next * width + x];

    // Pairwise sums keep a uniform field at exactly zero.
    ((right + left) + (up + down) - 4.0 * center) / (dx * dx)
}

/// Compute the Laplacian of the whole grid into `out`.
///
/// Rows are processed in parallel.
pub fn laplacian_into(field: &[f32], out: &mut [f32], width: usize, height: usize, dx: f32) {
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = laplacian(field, width, height, x, y, dx);
            }
        });
}
