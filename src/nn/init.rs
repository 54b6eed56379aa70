//! Uniform parameter initialization

use ndarray::{ArrayD, IxDyn};
use rand::Rng;

/// Array of `shape` filled uniformly from `[low, high]`
pub(crate) fn uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> ArrayD<f32> {
    if low >= high {
        return ArrayD::from_elem(IxDyn(shape), low);
    }
    ArrayD::from_shape_fn(IxDyn(shape), |_| rng.random_range(low..=high))
}

/// Bound of the default `±1/sqrt(fan_in)` initialization
pub(crate) fn fan_in_bound(fan_in: usize) -> f32 {
    if fan_in == 0 {
        0.0
    } else {
        1.0 / (fan_in as f32).sqrt()
    }
}
