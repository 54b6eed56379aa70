//! Quantization grids
//!
//! Two grid families are supported:
//! - **Linear**: `size` evenly spaced levels covering `[bottom, top]`
//! - **Geometric**: `0` plus `±init·gammaᵏ` for `k ∈ [0, size)`
//!
//! Levels are recomputed from the parameters on every projection, so a grid
//! is just its parameters.

use crate::error::{Error, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid family tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridFamily {
    Linear,
    Geometric,
}

impl fmt::Display for GridFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridFamily::Linear => write!(f, "linear"),
            GridFamily::Geometric => write!(f, "geometric"),
        }
    }
}

/// A fixed set of representable values weights are rounded to
pub trait Grid: Clone + fmt::Debug + 'static {
    /// Family of this grid
    fn family(&self) -> GridFamily;

    /// All levels in ascending order
    fn levels(&self) -> Vec<f32>;

    /// Closed interval spanned by the levels
    fn support(&self) -> (f32, f32);

    /// Nearest level to `x` (NaN stays NaN)
    fn project_value(&self, x: f32) -> f32;

    /// Check the parameters describe a usable grid
    fn validate(&self) -> Result<()>;

    /// Run-time description of this grid
    fn spec(&self) -> GridSpec;

    /// Element-wise projection of an array
    fn project_array(&self, weights: &ArrayD<f32>) -> ArrayD<f32> {
        weights.mapv(|x| self.project_value(x))
    }

    /// Whether `x` lies inside [`Grid::support`]
    fn contains(&self, x: f32) -> bool {
        let (lo, hi) = self.support();
        x >= lo && x <= hi
    }
}

/// `size` evenly spaced levels from `bottom` to `top` inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearGrid {
    pub bottom: f32,
    pub top: f32,
    pub size: usize,
}

impl LinearGrid {
    pub fn new(bottom: f32, top: f32, size: usize) -> Self {
        Self { bottom, top, size }
    }

    /// Distance between neighbouring levels (0 for a single-level grid)
    pub fn step(&self) -> f32 {
        if self.size < 2 {
            0.0
        } else {
            (self.top - self.bottom) / (self.size - 1) as f32
        }
    }

    /// Bounds that cannot order a support, including NaN bounds
    fn is_inverted(&self) -> bool {
        self.bottom.is_nan() || self.top.is_nan() || self.bottom >= self.top
    }

    /// Value of level `index`
    fn level(&self, index: usize) -> f32 {
        if index + 1 >= self.size {
            // Pin the last level so float drift never overshoots `top`
            if self.size < 2 {
                self.bottom
            } else {
                self.top
            }
        } else {
            self.bottom + index as f32 * self.step()
        }
    }
}

impl Default for LinearGrid {
    fn default() -> Self {
        Self::new(-1.0, 1.0, 5)
    }
}

impl Grid for LinearGrid {
    fn spec(&self) -> GridSpec {
        (*self).into()
    }

    fn family(&self) -> GridFamily {
        GridFamily::Linear
    }

    fn levels(&self) -> Vec<f32> {
        (0..self.size.max(1)).map(|k| self.level(k)).collect()
    }

    fn support(&self) -> (f32, f32) {
        (self.bottom, self.top)
    }

    /// Ties between two levels go to the upper one
    fn project_value(&self, x: f32) -> f32 {
        if x.is_nan() {
            return x;
        }
        if self.size < 2 || self.is_inverted() {
            return self.bottom;
        }
        let clamped = x.clamp(self.bottom, self.top);
        let index = ((clamped - self.bottom) / self.step()).round();
        let index = (index.max(0.0) as usize).min(self.size - 1);
        self.level(index)
    }

    fn validate(&self) -> Result<()> {
        if !self.bottom.is_finite() || !self.top.is_finite() {
            return Err(Error::InvalidGrid(format!(
                "linear bounds must be finite (bottom={}, top={})",
                self.bottom, self.top
            )));
        }
        if self.bottom >= self.top {
            return Err(Error::InvalidGrid(format!(
                "linear grid needs bottom < top (bottom={}, top={})",
                self.bottom, self.top
            )));
        }
        if self.size < 2 {
            return Err(Error::InvalidGrid(format!(
                "linear grid needs at least 2 levels (size={})",
                self.size
            )));
        }
        Ok(())
    }
}

/// Zero plus `±init·gammaᵏ` for `k` in `0..size`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricGrid {
    pub gamma: f32,
    pub init: f32,
    pub size: usize,
}

impl GeometricGrid {
    pub fn new(gamma: f32, init: f32, size: usize) -> Self {
        Self { gamma, init, size }
    }

    /// Positive level `k`: `init·gammaᵏ`
    pub fn magnitude(&self, k: usize) -> f32 {
        self.init * self.gamma.powi(k as i32)
    }

    /// Largest representable magnitude, `init·gamma^(size-1)`
    pub fn max_magnitude(&self) -> f32 {
        if self.size == 0 {
            0.0
        } else {
            self.magnitude(self.size - 1)
        }
    }

    /// Nearest magnitude level (or zero) to a non-negative value
    ///
    /// Ties go to the larger magnitude.
    fn nearest_magnitude(&self, a: f32) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let top = self.max_magnitude();
        if a >= top {
            return top;
        }
        if a * 2.0 < self.init {
            return 0.0;
        }

        // Estimate the bracket from the logarithm, then settle on the closer neighbour
        let estimate = ((a / self.init).ln() / self.gamma.ln()).floor();
        let k = (estimate.max(0.0) as usize).min(self.size - 1);
        let lower = self.magnitude(k);
        let upper = self.magnitude((k + 1).min(self.size - 1));

        if a < lower {
            // a ∈ [init/2, init), or float drift just under a level
            return lower;
        }
        if a - lower < upper - a {
            lower
        } else {
            upper
        }
    }
}

impl Default for GeometricGrid {
    fn default() -> Self {
        Self::new(2.0, 0.25, 5)
    }
}

impl Grid for GeometricGrid {
    fn spec(&self) -> GridSpec {
        (*self).into()
    }

    fn family(&self) -> GridFamily {
        GridFamily::Geometric
    }

    fn levels(&self) -> Vec<f32> {
        let positive: Vec<f32> = (0..self.size).map(|k| self.magnitude(k)).collect();
        positive
            .iter()
            .rev()
            .map(|m| -m)
            .chain(std::iter::once(0.0))
            .chain(positive.iter().copied())
            .collect()
    }

    fn support(&self) -> (f32, f32) {
        let top = self.max_magnitude();
        (-top, top)
    }

    fn project_value(&self, x: f32) -> f32 {
        if x.is_nan() {
            return x;
        }
        let magnitude = self.nearest_magnitude(x.abs());
        if magnitude == 0.0 {
            0.0
        } else {
            magnitude.copysign(x)
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.gamma.is_finite() || self.gamma <= 1.0 {
            return Err(Error::InvalidGrid(format!(
                "geometric ratio must be finite and > 1 (gamma={})",
                self.gamma
            )));
        }
        if !self.init.is_finite() || self.init <= 0.0 {
            return Err(Error::InvalidGrid(format!(
                "geometric initial step must be finite and > 0 (init={})",
                self.init
            )));
        }
        if self.size == 0 {
            return Err(Error::InvalidGrid(
                "geometric grid needs at least 1 positive level (size=0)".to_string(),
            ));
        }
        if !self.max_magnitude().is_finite() {
            return Err(Error::InvalidGrid(format!(
                "geometric grid overflows f32 (gamma={}, init={}, size={})",
                self.gamma, self.init, self.size
            )));
        }
        Ok(())
    }
}

/// Grid chosen at run time, e.g. from a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum GridSpec {
    Linear {
        #[serde(default = "default_bottom")]
        bottom: f32,
        #[serde(default = "default_top")]
        top: f32,
        #[serde(default = "default_size")]
        size: usize,
    },
    Geometric {
        #[serde(default = "default_gamma")]
        gamma: f32,
        #[serde(default = "default_init")]
        init: f32,
        #[serde(default = "default_size")]
        size: usize,
    },
}

fn default_bottom() -> f32 {
    -1.0
}

fn default_top() -> f32 {
    1.0
}

fn default_gamma() -> f32 {
    2.0
}

fn default_init() -> f32 {
    0.25
}

fn default_size() -> usize {
    5
}

impl GridSpec {
    pub fn family(&self) -> GridFamily {
        match self {
            GridSpec::Linear { .. } => GridFamily::Linear,
            GridSpec::Geometric { .. } => GridFamily::Geometric,
        }
    }

    pub fn levels(&self) -> Vec<f32> {
        match *self {
            GridSpec::Linear { bottom, top, size } => LinearGrid::new(bottom, top, size).levels(),
            GridSpec::Geometric { gamma, init, size } => {
                GeometricGrid::new(gamma, init, size).levels()
            }
        }
    }

    pub fn support(&self) -> (f32, f32) {
        match *self {
            GridSpec::Linear { bottom, top, size } => LinearGrid::new(bottom, top, size).support(),
            GridSpec::Geometric { gamma, init, size } => {
                GeometricGrid::new(gamma, init, size).support()
            }
        }
    }

    pub fn project_value(&self, x: f32) -> f32 {
        match *self {
            GridSpec::Linear { bottom, top, size } => {
                LinearGrid::new(bottom, top, size).project_value(x)
            }
            GridSpec::Geometric { gamma, init, size } => {
                GeometricGrid::new(gamma, init, size).project_value(x)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            GridSpec::Linear { bottom, top, size } => LinearGrid::new(bottom, top, size).validate(),
            GridSpec::Geometric { gamma, init, size } => {
                GeometricGrid::new(gamma, init, size).validate()
            }
        }
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        LinearGrid::default().into()
    }
}

impl From<LinearGrid> for GridSpec {
    fn from(grid: LinearGrid) -> Self {
        GridSpec::Linear {
            bottom: grid.bottom,
            top: grid.top,
            size: grid.size,
        }
    }
}

impl From<GeometricGrid> for GridSpec {
    fn from(grid: GeometricGrid) -> Self {
        GridSpec::Geometric {
            gamma: grid.gamma,
            init: grid.init,
            size: grid.size,
        }
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridSpec::Linear { bottom, top, size } => {
                write!(f, "linear(bottom={bottom}, top={top}, size={size})")
            }
            GridSpec::Geometric { gamma, init, size } => {
                write!(f, "geometric(gamma={gamma}, init={init}, size={size})")
            }
        }
    }
}
