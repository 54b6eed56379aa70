//! Quantization grids and elastic quantization-aware operators
//!
//! - Grids: [`LinearGrid`] (evenly spaced) and [`GeometricGrid`] (signed powers)
//! - Projection: [`lin_proj`], [`exp_proj`] for the evaluation path
//! - Operators: [`QuantWeight`] and [`QuantDense`] with straight-through gradients
//! - Error analysis of a grid on a set of weights

mod connect;
mod error_analysis;
mod grid;
mod proj;

pub use connect::{
    QuantDense, QuantLinDense, QuantLogDense, QuantWeight, QuantWeightExp, QuantWeightLin,
};
pub use error_analysis::{
    analyze_error, compare_grids, error_within_bounds, quantization_mse, theoretical_max_error,
    QuantErrorStats,
};
pub use grid::{GeometricGrid, Grid, GridFamily, GridSpec, LinearGrid};
pub use proj::{exp_proj, lin_proj, project};
