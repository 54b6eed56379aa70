//! Layer trees and model-wide elastic utilities
//!
//! [`Layer`] is the closed set of layer kinds a model is built from. Walks
//! over a tree select quantized layers through [`Layer::as_elastic`] rather
//! than by concrete type, so adding a quantized kind only touches that method.

use super::{
    Conv2d, ElasticLayer, Linear, LinearQuantLin, LinearQuantLog, Mode, Module, QuantConv2dLin,
    QuantConv2dLog,
};
use crate::autograd::{flatten, relu, Device};
use crate::error::Result;
use crate::quant::{GeometricGrid, GridSpec, LinearGrid};
use crate::Tensor;
use tracing::debug;

/// Element-wise `max(0, x)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu {
    mode: Mode,
}

/// `[N, ...] -> [N, prod(...)]`
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten {
    mode: Mode,
}

/// Layers applied in order
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
    mode: Mode,
}

impl Sequential {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            mode: Mode::default(),
        }
    }

    pub fn push(&mut self, layer: impl Into<Layer>) {
        self.layers.push(layer.into());
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Every layer kind a model can contain
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Conv2d(Conv2d),
    Relu(Relu),
    Flatten(Flatten),
    LinearQuantLin(LinearQuantLin),
    LinearQuantLog(LinearQuantLog),
    QuantConv2dLin(QuantConv2dLin),
    QuantConv2dLog(QuantConv2dLog),
    Sequential(Sequential),
}

impl Layer {
    pub fn relu() -> Self {
        Layer::Relu(Relu::default())
    }

    pub fn flatten() -> Self {
        Layer::Flatten(Flatten::default())
    }

    pub fn sequential(layers: Vec<Layer>) -> Self {
        Layer::Sequential(Sequential::new(layers))
    }

    /// Name of the variant, as used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Linear(_) => "Linear",
            Layer::Conv2d(_) => "Conv2d",
            Layer::Relu(_) => "ReLU",
            Layer::Flatten(_) => "Flatten",
            Layer::LinearQuantLin(_) => "LinearQuantLin",
            Layer::LinearQuantLog(_) => "LinearQuantLog",
            Layer::QuantConv2dLin(_) => "QuantConv2dLin",
            Layer::QuantConv2dLog(_) => "QuantConv2dLog",
            Layer::Sequential(_) => "Sequential",
        }
    }

    /// The quantized-layer capability, if this layer has it
    pub fn as_elastic(&self) -> Option<&dyn ElasticLayer> {
        match self {
            Layer::LinearQuantLin(l) => Some(l),
            Layer::LinearQuantLog(l) => Some(l),
            Layer::QuantConv2dLin(l) => Some(l),
            Layer::QuantConv2dLog(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_elastic_mut(&mut self) -> Option<&mut dyn ElasticLayer> {
        match self {
            Layer::LinearQuantLin(l) => Some(l),
            Layer::LinearQuantLog(l) => Some(l),
            Layer::QuantConv2dLin(l) => Some(l),
            Layer::QuantConv2dLog(l) => Some(l),
            _ => None,
        }
    }

    fn as_module(&self) -> &dyn Module {
        match self {
            Layer::Linear(l) => l,
            Layer::Conv2d(l) => l,
            Layer::Relu(l) => l,
            Layer::Flatten(l) => l,
            Layer::LinearQuantLin(l) => l,
            Layer::LinearQuantLog(l) => l,
            Layer::QuantConv2dLin(l) => l,
            Layer::QuantConv2dLog(l) => l,
            Layer::Sequential(l) => l,
        }
    }

    fn as_module_mut(&mut self) -> &mut dyn Module {
        match self {
            Layer::Linear(l) => l,
            Layer::Conv2d(l) => l,
            Layer::Relu(l) => l,
            Layer::Flatten(l) => l,
            Layer::LinearQuantLin(l) => l,
            Layer::LinearQuantLog(l) => l,
            Layer::QuantConv2dLin(l) => l,
            Layer::QuantConv2dLog(l) => l,
            Layer::Sequential(l) => l,
        }
    }
}

macro_rules! impl_from_layer {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Layer {
                fn from(layer: $variant) -> Self {
                    Layer::$variant(layer)
                }
            }
        )*
    };
}

impl_from_layer!(
    Linear,
    Conv2d,
    Relu,
    Flatten,
    LinearQuantLin,
    LinearQuantLog,
    QuantConv2dLin,
    QuantConv2dLog,
    Sequential,
);

impl Module for Relu {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Ok(relu(input))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    fn to_device(&mut self, _device: Device) {}
}

impl Module for Flatten {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        flatten(input)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    fn to_device(&mut self, _device: Device) {}
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        for layer in &mut self.layers {
            layer.set_mode(mode);
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    fn to_device(&mut self, device: Device) {
        for layer in &mut self.layers {
            layer.to_device(device);
        }
    }
}

impl Module for Layer {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.as_module().forward(input)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.as_module_mut().set_mode(mode);
    }

    fn mode(&self) -> Mode {
        self.as_module().mode()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.as_module().parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.as_module_mut().parameters_mut()
    }

    fn to_device(&mut self, device: Device) {
        self.as_module_mut().to_device(device);
    }
}

/// All quantized layers in `model`, depth-first
pub fn elastic_layers(model: &Layer) -> Vec<&dyn ElasticLayer> {
    fn walk<'a>(layer: &'a Layer, out: &mut Vec<&'a dyn ElasticLayer>) {
        if let Layer::Sequential(seq) = layer {
            for child in seq.layers() {
                walk(child, out);
            }
        } else if let Some(elastic) = layer.as_elastic() {
            out.push(elastic);
        }
    }

    let mut out = Vec::new();
    walk(model, &mut out);
    out
}

pub fn elastic_layers_mut(model: &mut Layer) -> Vec<&mut dyn ElasticLayer> {
    fn walk<'a>(layer: &'a mut Layer, out: &mut Vec<&'a mut dyn ElasticLayer>) {
        match layer {
            Layer::Sequential(seq) => {
                for child in seq.layers_mut() {
                    walk(child, out);
                }
            }
            other => {
                if let Some(elastic) = other.as_elastic_mut() {
                    out.push(elastic);
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(model, &mut out);
    out
}

/// Set alpha on every quantized layer, returning how many were updated
pub fn set_model_alpha(model: &mut Layer, alpha: f32) -> usize {
    let layers = elastic_layers_mut(model);
    let count = layers.len();
    for layer in layers {
        layer.set_alpha(alpha);
    }
    debug!(alpha, layers = count, "broadcast alpha");
    count
}

/// Set beta on every quantized layer, returning how many were updated
pub fn set_model_beta(model: &mut Layer, beta: f32) -> usize {
    let layers = elastic_layers_mut(model);
    let count = layers.len();
    for layer in layers {
        layer.set_beta(beta);
    }
    debug!(beta, layers = count, "broadcast beta");
    count
}

/// Clamp every quantized layer into its grid support
pub fn clamp_model(model: &mut Layer) -> usize {
    let layers = elastic_layers_mut(model);
    let count = layers.len();
    for layer in layers {
        layer.clamp();
    }
    count
}

/// Replace every standard `Linear`/`Conv2d` in `model` with its quantized
/// counterpart on `grid`, returning how many layers were converted
///
/// The grid is validated before any layer is touched.
pub fn quantize_model(model: &mut Layer, grid: &GridSpec) -> Result<usize> {
    grid.validate()?;

    fn walk(layer: &mut Layer, grid: &GridSpec) -> Result<usize> {
        match layer {
            Layer::Sequential(seq) => {
                let mut count = 0;
                for child in seq.layers_mut() {
                    count += walk(child, grid)?;
                }
                Ok(count)
            }
            Layer::Linear(_) | Layer::Conv2d(_) => {
                *layer = convert_layer(layer, grid)?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    let converted = walk(model, grid)?;
    debug!(converted, grid = %grid, "quantized model");
    Ok(converted)
}

/// Quantized counterpart of a single `Linear` or `Conv2d` layer
pub fn convert_layer(layer: &Layer, grid: &GridSpec) -> Result<Layer> {
    let converted = match (*grid, layer) {
        (GridSpec::Linear { bottom, top, size }, Layer::Conv2d(_)) => Layer::QuantConv2dLin(
            QuantConv2dLin::convert(layer, LinearGrid::new(bottom, top, size))?,
        ),
        (GridSpec::Linear { bottom, top, size }, _) => Layer::LinearQuantLin(
            LinearQuantLin::convert(layer, LinearGrid::new(bottom, top, size))?,
        ),
        (GridSpec::Geometric { gamma, init, size }, Layer::Conv2d(_)) => Layer::QuantConv2dLog(
            QuantConv2dLog::convert(layer, GeometricGrid::new(gamma, init, size))?,
        ),
        (GridSpec::Geometric { gamma, init, size }, _) => Layer::LinearQuantLog(
            LinearQuantLog::convert(layer, GeometricGrid::new(gamma, init, size))?,
        ),
    };
    Ok(converted)
}
