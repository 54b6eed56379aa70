//! Standard 2-D convolution layer

use super::init::{fan_in_bound, uniform};
use super::{Mode, Module};
use crate::autograd::{conv2d, Conv2dOptions, Device};
use crate::error::{Error, Result};
use crate::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Shape and hyper-parameters of a [`Conv2d`]
///
/// Padding defaults to 0 for every convolution, quantized shells included.
/// Use [`Conv2dConfig::with_padding`] with `[1, 1]` for "same"-sized 3x3
/// outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: [usize; 2],
    #[serde(default)]
    pub options: Conv2dOptions,
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

impl Conv2dConfig {
    /// Stride 1, no padding, no dilation, one group, with bias
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: [usize; 2]) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            options: Conv2dOptions::default(),
            bias: true,
        }
    }

    pub fn with_stride(mut self, stride: [usize; 2]) -> Self {
        self.options.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: [usize; 2]) -> Self {
        self.options.padding = padding;
        self
    }

    pub fn with_dilation(mut self, dilation: [usize; 2]) -> Self {
        self.options.dilation = dilation;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.options.groups = groups;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Weight shape `[out_channels, in_channels / groups, kH, kW]`
    pub fn weight_shape(&self) -> [usize; 4] {
        let groups = self.options.groups.max(1);
        [
            self.out_channels,
            self.in_channels / groups,
            self.kernel_size[0],
            self.kernel_size[1],
        ]
    }

    /// Inputs feeding one output value
    pub fn fan_in(&self) -> usize {
        let [_, per_group, kh, kw] = self.weight_shape();
        per_group * kh * kw
    }

    pub fn validate(&self) -> Result<()> {
        let o = &self.options;
        if o.groups == 0 {
            return Err(Error::InvalidParameter("groups must be at least 1".into()));
        }
        if self.in_channels % o.groups != 0 || self.out_channels % o.groups != 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![self.in_channels, self.out_channels, o.groups],
                got: vec![self.in_channels % o.groups, self.out_channels % o.groups],
            });
        }
        if self.kernel_size.contains(&0) || o.stride.contains(&0) || o.dilation.contains(&0) {
            return Err(Error::InvalidParameter(format!(
                "kernel {:?}, stride {:?} and dilation {:?} must be positive",
                self.kernel_size, o.stride, o.dilation
            )));
        }
        Ok(())
    }

    /// Build a layer initialized uniformly in `±1/sqrt(fan_in)`
    pub fn init(&self) -> Result<Conv2d> {
        self.init_with(&mut rand::rng())
    }

    pub fn init_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Conv2d> {
        self.validate()?;
        let bound = fan_in_bound(self.fan_in());
        let weight = Tensor::new(uniform(&self.weight_shape(), -bound, bound, rng), true);
        let bias = self
            .bias
            .then(|| Tensor::new(uniform(&[self.out_channels], -bound, bound, rng), true));

        Ok(Conv2d {
            config: *self,
            weight,
            bias,
            mode: Mode::default(),
        })
    }
}

/// 2-D convolution over `[batch, channels, height, width]` input
#[derive(Debug, Clone)]
pub struct Conv2d {
    config: Conv2dConfig,
    weight: Tensor,
    bias: Option<Tensor>,
    mode: Mode,
}

impl Conv2d {
    pub fn new(config: Conv2dConfig) -> Result<Self> {
        config.init()
    }

    pub fn with_rng<R: Rng + ?Sized>(config: Conv2dConfig, rng: &mut R) -> Result<Self> {
        config.init_with(rng)
    }

    /// Build from existing tensors matching `config`
    pub fn from_parts(config: Conv2dConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        config.validate()?;
        if weight.shape() != config.weight_shape() {
            return Err(Error::ShapeMismatch {
                expected: config.weight_shape().to_vec(),
                got: weight.shape().to_vec(),
            });
        }
        match &bias {
            Some(b) if b.shape() != [config.out_channels] => {
                return Err(Error::ShapeMismatch {
                    expected: vec![config.out_channels],
                    got: b.shape().to_vec(),
                });
            }
            Some(b) if b.device() != weight.device() => {
                return Err(Error::DeviceMismatch {
                    expected: weight.device(),
                    got: b.device(),
                });
            }
            _ => {}
        }

        Ok(Self {
            config: Conv2dConfig {
                bias: bias.is_some(),
                ..config
            },
            weight,
            bias,
            mode: Mode::default(),
        })
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn options(&self) -> Conv2dOptions {
        self.config.options
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

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        conv2d(input, &self.weight, self.bias.as_ref(), self.config.options)
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
