//! Quantization error analysis
//!
//! Measures how much a grid distorts a set of weights:
//! - Error statistics (MSE, MAE, max error, SQNR, outlier rate)
//! - Theoretical worst case for values inside the grid support
//! - Side-by-side comparison of two grids on the same values

use super::grid::Grid;
use serde::{Deserialize, Serialize};

/// Error statistics for quantization analysis
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuantErrorStats {
    /// Mean Squared Error
    pub mse: f32,
    /// Mean Absolute Error
    pub mae: f32,
    /// Maximum absolute error
    pub max_error: f32,
    /// Signal-to-Quantization-Noise Ratio (SQNR) in dB
    pub sqnr_db: f32,
    /// Fraction of values with error > threshold
    pub outlier_rate: f32,
    /// Number of samples
    pub num_samples: usize,
}

impl QuantErrorStats {
    /// Root Mean Squared Error
    pub fn rmse(&self) -> f32 {
        self.mse.sqrt()
    }
}

/// Mean squared difference between two equally long slices
pub fn quantization_mse(original: &[f32], quantized: &[f32]) -> f32 {
    if original.is_empty() {
        return 0.0;
    }
    original
        .iter()
        .zip(quantized.iter())
        .map(|(o, q)| (o - q) * (o - q))
        .sum::<f32>()
        / original.len() as f32
}

/// Analyze quantization error of `original` projected onto `grid`
///
/// # Arguments
/// * `original` - Original f32 values
/// * `grid` - Target grid
/// * `outlier_threshold` - Error threshold for outlier detection
pub fn analyze_error<G: Grid>(original: &[f32], grid: &G, outlier_threshold: f32) -> QuantErrorStats {
    if original.is_empty() {
        return QuantErrorStats::default();
    }

    let projected: Vec<f32> = original.iter().map(|&x| grid.project_value(x)).collect();

    let errors: Vec<f32> = original
        .iter()
        .zip(projected.iter())
        .map(|(o, p)| (o - p).abs())
        .collect();

    let mse = quantization_mse(original, &projected);
    let mae = errors.iter().sum::<f32>() / errors.len() as f32;
    let max_error = errors.iter().cloned().fold(0.0f32, f32::max);

    let outlier_count = errors.iter().filter(|&&e| e > outlier_threshold).count();
    let outlier_rate = outlier_count as f32 / errors.len() as f32;

    // SQNR = 10 * log10(signal_power / noise_power)
    let signal_power: f32 = original.iter().map(|x| x * x).sum::<f32>() / original.len() as f32;
    let sqnr_db = if mse > 1e-10 {
        10.0 * (signal_power / mse).log10()
    } else {
        f32::INFINITY
    };

    QuantErrorStats {
        mse,
        mae,
        max_error,
        sqnr_db,
        outlier_rate,
        num_samples: original.len(),
    }
}

/// Largest error a value inside the grid support can suffer
///
/// Half of the widest gap between neighbouring levels. Values outside the
/// support are clamped first and are not covered by this bound.
pub fn theoretical_max_error<G: Grid>(grid: &G) -> f32 {
    grid.levels()
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / 2.0)
        .fold(0.0f32, f32::max)
}

/// Check if the measured max error respects [`theoretical_max_error`]
pub fn error_within_bounds<G: Grid>(stats: &QuantErrorStats, grid: &G, tolerance: f32) -> bool {
    stats.max_error <= theoretical_max_error(grid) * (1.0 + tolerance)
}

/// Compare two grids on the same values
///
/// Returns (mse_a, mse_b, ratio) with `ratio = mse_a / mse_b`.
pub fn compare_grids<A: Grid, B: Grid>(values: &[f32], a: &A, b: &B) -> (f32, f32, f32) {
    let mse_a = analyze_error(values, a, f32::INFINITY).mse;
    let mse_b = analyze_error(values, b, f32::INFINITY).mse;

    let ratio = if mse_b > 1e-10 {
        mse_a / mse_b
    } else if mse_a > 1e-10 {
        f32::INFINITY
    } else {
        1.0
    };

    (mse_a, mse_b, ratio)
}
