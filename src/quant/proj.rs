//! Weight projection onto quantization grids
//!
//! Pure functions: the result is detached from the gradient tape and placed
//! on the input's device. Layers use them on the evaluation path.

use super::grid::{GeometricGrid, Grid, LinearGrid};
use crate::Tensor;

/// Replace every element with the nearest of `size` evenly spaced levels
/// spanning `[bottom, top]`
///
/// Values outside the interval clamp to the nearest endpoint. A grid with
/// `size <= 1`, or with `bottom` not below `top`, maps everything to `bottom`.
pub fn lin_proj(weight: &Tensor, bottom: f32, top: f32, size: usize) -> Tensor {
    project(weight, &LinearGrid::new(bottom, top, size))
}

/// Replace every element with the nearest of `0, ±init·gammaᵏ (k < size)`
///
/// The sign is preserved and zero maps to zero.
pub fn exp_proj(weight: &Tensor, gamma: f32, init: f32, size: usize) -> Tensor {
    project(weight, &GeometricGrid::new(gamma, init, size))
}

/// Detached projection of `weight` onto any grid
pub fn project<G: Grid>(weight: &Tensor, grid: &G) -> Tensor {
    let mut projected = weight.detach();
    *projected.data_mut() = grid.project_array(weight.data());
    projected
}
