//! Quantization-aware training loop
//!
//! This module provides:
//! - Loss functions (MSE)
//! - [`QatTrainer`]: train steps, epochs with alpha/beta annealing, evaluation
//! - Training configuration and metrics

mod batch;
mod config;
mod loss;
mod trainer;


pub use batch::Batch;
pub use config::{MetricsTracker, TrainConfig};
pub use loss::{LossFn, MSELoss};
pub use trainer::{QatTrainer, TrainResult};
