//! # Elastiq: elastic quantization-aware layers
//!
//! Elastiq trains dense and convolution layers whose weights are projected
//! onto a fixed grid of levels in the forward pass while gradients flow
//! back to the raw weights. Two coefficients control the projection:
//! `alpha` blends the projected weight with the raw one, and `beta` pulls
//! raw weights toward their projections during back-propagation.
//!
//! ## Architecture
//!
//! - **autograd**: Tape-based automatic differentiation
//! - **quant**: Linear and geometric grids, projection and the elastic operators
//! - **nn**: Standard and quantized layers, layer trees, model-wide coefficient control
//! - **optim**: Optimizers (SGD, Adam) and value schedules
//! - **train**: Quantization-aware training loop
//! - **config**: Declarative YAML configuration

pub mod autograd;
pub mod config;
pub mod nn;
pub mod optim;
pub mod quant;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Context, Tensor};
pub use error::{Error, Result};
