//! Layers: standard donors, quantized shells and model-wide utilities
//!
//! - [`Linear`], [`Conv2d`]: standard layers, also used as conversion donors
//! - [`QuantLinear`], [`QuantConv2d`]: quantization-aware shells
//! - [`Layer`]: closed set of layer kinds forming a model tree
//! - [`set_model_alpha`], [`set_model_beta`], [`clamp_model`]: tree-wide updates

mod conv;
mod elastic;
mod init;
mod linear;
mod mode;
mod model;
mod module;
mod quant_conv;
mod quant_linear;


pub use conv::{Conv2d, Conv2dConfig};
pub use elastic::{ElasticCoefficients, ElasticLayer};
pub use linear::Linear;
pub use mode::Mode;
pub use model::{
    clamp_model, convert_layer, elastic_layers, elastic_layers_mut, quantize_model,
    set_model_alpha, set_model_beta, Flatten, Layer, Relu, Sequential,
};
pub use module::Module;
pub use quant_conv::{QuantConv2d, QuantConv2dLin, QuantConv2dLog};
pub use quant_linear::{LinearQuantLin, LinearQuantLog, QuantLinear};
