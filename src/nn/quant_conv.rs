//! Quantization-aware 2-D convolution layers

use super::elastic::{clamp_tensor, count_outside, ElasticCoefficients};
use super::{Conv2d, Conv2dConfig, ElasticLayer, Layer, Mode, Module};
use crate::autograd::{conv2d, Device};
use crate::error::{Error, Result};
use crate::quant::{project, GeometricGrid, Grid, GridSpec, LinearGrid, QuantWeight};
use crate::Tensor;
use rand::Rng;
use tracing::{debug, warn};

/// Convolution that forwards a grid-quantized copy of its kernel
///
/// Parameters keep the standard [`Conv2d`] initialization; only dense
/// layers draw their initial weights from the grid support.
#[derive(Debug, Clone)]
pub struct QuantConv2d<G: Grid> {
    inner: Conv2d,
    grid: G,
    coefficients: ElasticCoefficients,
    op: QuantWeight<G>,
}

/// Convolution on a linear grid
pub type QuantConv2dLin = QuantConv2d<LinearGrid>;
/// Convolution on a geometric grid
pub type QuantConv2dLog = QuantConv2d<GeometricGrid>;

impl<G: Grid> QuantConv2d<G> {
    pub fn new(config: Conv2dConfig, grid: G) -> Result<Self> {
        Self::with_rng(config, grid, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: Conv2dConfig, grid: G, rng: &mut R) -> Result<Self> {
        grid.validate()?;
        Ok(Self::assemble(Conv2d::with_rng(config, rng)?, grid))
    }

    /// Quantized copy of a standard [`Conv2d`] donor
    pub fn convert(donor: &Layer, grid: G) -> Result<Self> {
        match donor {
            Layer::Conv2d(conv) => Self::from_conv(conv, grid),
            other => Err(Error::TypeMismatch {
                expected: "Conv2d",
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn from_conv(donor: &Conv2d, grid: G) -> Result<Self> {
        grid.validate()?;
        let device = donor.device();
        let weight = Tensor::with_data_on_device(donor.weight().data().clone(), true, device);
        let bias = donor
            .bias()
            .map(|b| Tensor::with_data_on_device(b.data().clone(), true, device));

        let outside = count_outside(&weight, grid.support());
        if outside > 0 {
            warn!(
                outside,
                total = weight.len(),
                grid = %grid.spec(),
                "donor weights lie outside the grid support"
            );
        }
        let config = *donor.config();
        debug!(
            in_channels = config.in_channels,
            out_channels = config.out_channels,
            kernel = ?config.kernel_size,
            grid = %grid.spec(),
            "converted Conv2d to quantized convolution"
        );

        let mut layer = Self::assemble(Conv2d::from_parts(config, weight, bias)?, grid);
        layer.set_mode(donor.mode());
        Ok(layer)
    }

    fn assemble(inner: Conv2d, grid: G) -> Self {
        let coefficients = ElasticCoefficients::new(0.0, 0.0, inner.device());
        let op = QuantWeight::new(grid.clone());
        Self {
            inner,
            grid,
            coefficients,
            op,
        }
    }

    pub fn with_coefficients(mut self, alpha: f32, beta: f32) -> Self {
        self.set_alpha(alpha);
        self.set_beta(beta);
        self
    }

    pub fn config(&self) -> &Conv2dConfig {
        self.inner.config()
    }

    pub fn weight(&self) -> &Tensor {
        self.inner.weight()
    }

    pub fn weight_mut(&mut self) -> &mut Tensor {
        self.inner.weight_mut()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.inner.bias()
    }

    pub fn quant_grid(&self) -> &G {
        &self.grid
    }

    pub fn coefficients(&self) -> &ElasticCoefficients {
        &self.coefficients
    }
}

impl QuantConv2dLin {
    pub fn linear(config: Conv2dConfig, bottom: f32, top: f32, size: usize) -> Result<Self> {
        Self::new(config, LinearGrid::new(bottom, top, size))
    }
}

impl QuantConv2dLog {
    pub fn geometric(config: Conv2dConfig, gamma: f32, init: f32, size: usize) -> Result<Self> {
        Self::new(config, GeometricGrid::new(gamma, init, size))
    }
}

impl<G: Grid> Module for QuantConv2d<G> {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let weight = match self.inner.mode() {
            Mode::Train => self.op.apply(
                self.inner.weight(),
                self.coefficients.alpha_tensor(),
                self.coefficients.beta_tensor(),
            )?,
            Mode::Eval => self.quantized_weight(),
        };
        conv2d(input, &weight, self.inner.bias(), self.inner.options())
    }

    fn set_mode(&mut self, mode: Mode) {
        self.inner.set_mode(mode);
    }

    fn mode(&self) -> Mode {
        self.inner.mode()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.inner.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.inner.parameters_mut()
    }

    fn to_device(&mut self, device: Device) {
        self.inner.to_device(device);
        self.coefficients.to_device(device);
    }
}

impl<G: Grid> ElasticLayer for QuantConv2d<G> {
    fn clamp(&mut self) {
        let support = self.grid.support();
        for param in self.inner.parameters_mut() {
            clamp_tensor(param, support);
        }
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.coefficients.set_alpha(alpha, self.inner.device());
    }

    fn set_beta(&mut self, beta: f32) {
        self.coefficients.set_beta(beta, self.inner.device());
    }

    fn alpha(&self) -> f32 {
        self.coefficients.alpha()
    }

    fn beta(&self) -> f32 {
        self.coefficients.beta()
    }

    fn quantized_weight(&self) -> Tensor {
        project(self.inner.weight(), &self.grid)
    }

    fn grid(&self) -> GridSpec {
        self.grid.spec()
    }
}
