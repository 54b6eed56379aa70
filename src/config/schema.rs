//! YAML schema definitions for quantization-aware training configuration

use crate::quant::GridSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete QAT specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QatSpec {
    /// Grid and elastic coefficient configuration
    pub quantize: QuantSpec,

    /// Optimizer configuration
    pub optimizer: OptimSpec,

    /// Training hyperparameters
    #[serde(default)]
    pub training: TrainingParams,
}

/// Quantization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantSpec {
    /// Target grid, tagged by `family`
    pub grid: GridSpec,

    /// Initial alpha and beta
    #[serde(default)]
    pub elastic: ElasticSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha_schedule: Option<ScheduleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta_schedule: Option<ScheduleSpec>,

    /// Clip weights into the grid support after every optimizer step
    #[serde(default = "default_true")]
    pub clamp_after_step: bool,
}

/// Elastic coefficients applied before any schedule
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElasticSpec {
    #[serde(default)]
    pub alpha: f32,

    #[serde(default)]
    pub beta: f32,
}

/// Per-epoch schedule for a coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Constant { value: f32 },
    Linear { start: f32, end: f32, steps: usize },
    Cosine { start: f32, end: f32, steps: usize },
}

impl ScheduleSpec {
    /// Value at step 0
    pub fn start(&self) -> f32 {
        match *self {
            ScheduleSpec::Constant { value } => value,
            ScheduleSpec::Linear { start, .. } | ScheduleSpec::Cosine { start, .. } => start,
        }
    }

    /// Value once the schedule has finished
    pub fn end(&self) -> f32 {
        match *self {
            ScheduleSpec::Constant { value } => value,
            ScheduleSpec::Linear { end, .. } | ScheduleSpec::Cosine { end, .. } => end,
        }
    }
}

/// Optimizer specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimSpec {
    /// Optimizer name: "adam" | "sgd"
    pub name: String,

    /// Learning rate
    pub lr: f32,

    /// Optimizer-specific parameters (beta1, beta2, momentum, etc.)
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Number of epochs
    #[serde(default = "default_epochs")]
    pub epochs: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_epochs() -> usize {
    10
}
