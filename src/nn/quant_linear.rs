//! Quantization-aware dense layers

use super::elastic::{clamp_tensor, count_outside, ElasticCoefficients};
use super::init::uniform;
use super::{ElasticLayer, Layer, Linear, Mode, Module};
use crate::autograd::{linear, Device};
use crate::error::{Error, Result};
use crate::quant::{project, GeometricGrid, Grid, GridSpec, LinearGrid, QuantDense};
use crate::Tensor;
use rand::Rng;
use tracing::{debug, warn};

/// Dense layer that forwards a grid-quantized copy of its weight
///
/// In [`Mode::Train`] the fused [`QuantDense`] operator quantizes and
/// multiplies in one tape node. In [`Mode::Eval`] the weight is projected
/// with no gradient tracking and fed to an ordinary dense op.
#[derive(Debug, Clone)]
pub struct QuantLinear<G: Grid> {
    inner: Linear,
    grid: G,
    coefficients: ElasticCoefficients,
    op: QuantDense<G>,
}

/// Dense layer on a linear grid
pub type LinearQuantLin = QuantLinear<LinearGrid>;
/// Dense layer on a geometric grid
pub type LinearQuantLog = QuantLinear<GeometricGrid>;

impl<G: Grid> QuantLinear<G> {
    /// New layer with weight uniform over the grid support and zero bias
    pub fn new(in_features: usize, out_features: usize, bias: bool, grid: G) -> Result<Self> {
        Self::with_rng(in_features, out_features, bias, grid, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        grid: G,
        rng: &mut R,
    ) -> Result<Self> {
        grid.validate()?;
        let (lo, hi) = grid.support();
        let weight = Tensor::new(uniform(&[out_features, in_features], lo, hi, rng), true);
        let bias = bias.then(|| Tensor::zeros(&[out_features], true));

        Ok(Self::assemble(Linear::from_parts(weight, bias)?, grid))
    }

    /// Quantized copy of a standard [`Linear`] donor
    ///
    /// Weight and bias values are copied verbatim, on the donor's device.
    pub fn convert(donor: &Layer, grid: G) -> Result<Self> {
        match donor {
            Layer::Linear(linear) => Self::from_linear(linear, grid),
            other => Err(Error::TypeMismatch {
                expected: "Linear",
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn from_linear(donor: &Linear, grid: G) -> Result<Self> {
        grid.validate()?;
        let device = donor.device();
        let weight = Tensor::with_data_on_device(donor.weight().data().clone(), true, device);
        let bias = donor
            .bias()
            .map(|b| Tensor::with_data_on_device(b.data().clone(), true, device));

        let support = grid.support();
        let outside = count_outside(&weight, support);
        if outside > 0 {
            warn!(
                outside,
                total = weight.len(),
                grid = %grid.spec(),
                "donor weights lie outside the grid support"
            );
        }
        debug!(
            in_features = donor.in_features(),
            out_features = donor.out_features(),
            bias = bias.is_some(),
            grid = %grid.spec(),
            "converted Linear to quantized dense layer"
        );

        let mut layer = Self::assemble(Linear::from_parts(weight, bias)?, grid);
        layer.set_mode(donor.mode());
        Ok(layer)
    }

    fn assemble(inner: Linear, grid: G) -> Self {
        let coefficients = ElasticCoefficients::new(0.0, 0.0, inner.device());
        let op = QuantDense::new(grid.clone());
        Self {
            inner,
            grid,
            coefficients,
            op,
        }
    }

    /// Start from the given alpha and beta instead of zero
    pub fn with_coefficients(mut self, alpha: f32, beta: f32) -> Self {
        self.set_alpha(alpha);
        self.set_beta(beta);
        self
    }

    pub fn in_features(&self) -> usize {
        self.inner.in_features()
    }

    pub fn out_features(&self) -> usize {
        self.inner.out_features()
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

impl LinearQuantLin {
    pub fn linear(
        in_features: usize,
        out_features: usize,
        bias: bool,
        bottom: f32,
        top: f32,
        size: usize,
    ) -> Result<Self> {
        Self::new(in_features, out_features, bias, LinearGrid::new(bottom, top, size))
    }
}

impl LinearQuantLog {
    pub fn geometric(
        in_features: usize,
        out_features: usize,
        bias: bool,
        gamma: f32,
        init: f32,
        size: usize,
    ) -> Result<Self> {
        Self::new(in_features, out_features, bias, GeometricGrid::new(gamma, init, size))
    }
}

impl<G: Grid> Module for QuantLinear<G> {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match self.inner.mode() {
            Mode::Train => self.op.apply(
                input,
                self.inner.weight(),
                self.inner.bias(),
                self.coefficients.alpha_tensor(),
                self.coefficients.beta_tensor(),
            ),
            Mode::Eval => linear(input, &self.quantized_weight(), self.inner.bias()),
        }
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

impl<G: Grid> ElasticLayer for QuantLinear<G> {
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
