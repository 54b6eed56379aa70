//! Standard dense layer: `y = x @ Wᵀ + b`

use super::init::{fan_in_bound, uniform};
use super::{Mode, Module};
use crate::autograd::{linear, Device};
use crate::error::{Error, Result};
use crate::Tensor;
use rand::Rng;

/// Fully connected layer with weight `[out_features, in_features]`
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
    mode: Mode,
}

impl Linear {
    /// Create a layer initialized uniformly in `±1/sqrt(in_features)`
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        Self::with_rng(in_features, out_features, bias, &mut rand::rng())
    }

    /// Same as [`Linear::new`] drawing from `rng`
    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let bound = fan_in_bound(in_features);
        let weight = Tensor::new(uniform(&[out_features, in_features], -bound, bound, rng), true);
        let bias = bias.then(|| Tensor::new(uniform(&[out_features], -bound, bound, rng), true));

        Self {
            weight,
            bias,
            mode: Mode::default(),
        }
    }

    /// Build from existing tensors
    ///
    /// `weight` must be 2-D and `bias`, when present, must hold one value per
    /// output feature on the weight's device.
    pub fn from_parts(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weight.shape().len() != 2 {
            return Err(Error::ShapeMismatch {
                expected: vec![0, 0],
                got: weight.shape().to_vec(),
            });
        }
        if let Some(b) = &bias {
            if b.shape() != [weight.shape()[0]] {
                return Err(Error::ShapeMismatch {
                    expected: vec![weight.shape()[0]],
                    got: b.shape().to_vec(),
                });
            }
            if b.device() != weight.device() {
                return Err(Error::DeviceMismatch {
                    expected: weight.device(),
                    got: b.device(),
                });
            }
        }

        Ok(Self {
            weight,
            bias,
            mode: Mode::default(),
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Tensor {
        &mut self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Tensor> {
        self.bias.as_mut()
    }

    pub fn device(&self) -> Device {
        self.weight.device()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        linear(input, &self.weight, self.bias.as_ref())
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Tensor> {
        std::iter::once(&self.weight).chain(self.bias.as_ref()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        std::iter::once(&mut self.weight)
            .chain(self.bias.as_mut())
            .collect()
    }

    fn to_device(&mut self, device: Device) {
        self.weight = self.weight.to(device);
        if let Some(bias) = self.bias.as_mut() {
            *bias = bias.to(device);
        }
    }
}
