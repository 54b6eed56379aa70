//! Elastic coefficients and the quantized-layer capability

use super::Module;
use crate::autograd::Device;
use crate::quant::GridSpec;
use crate::Tensor;

/// Alpha and beta stored as non-trainable scalar tensors
///
/// Both live on the same device as the owning layer's weight so the
/// quantization operators accept them without a device mismatch.
#[derive(Debug, Clone)]
pub struct ElasticCoefficients {
    alpha: Tensor,
    beta: Tensor,
}

impl ElasticCoefficients {
    pub fn new(alpha: f32, beta: f32, device: Device) -> Self {
        Self {
            alpha: Tensor::scalar(alpha).to(device),
            beta: Tensor::scalar(beta).to(device),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha.item().unwrap_or(0.0)
    }

    pub fn beta(&self) -> f32 {
        self.beta.item().unwrap_or(0.0)
    }

    pub fn set_alpha(&mut self, alpha: f32, device: Device) {
        self.alpha = Tensor::scalar(alpha).to(device);
    }

    pub fn set_beta(&mut self, beta: f32, device: Device) {
        self.beta = Tensor::scalar(beta).to(device);
    }

    pub fn alpha_tensor(&self) -> &Tensor {
        &self.alpha
    }

    pub fn beta_tensor(&self) -> &Tensor {
        &self.beta
    }

    pub fn device(&self) -> Device {
        self.alpha.device()
    }

    pub fn to_device(&mut self, device: Device) {
        self.alpha = self.alpha.to(device);
        self.beta = self.beta.to(device);
    }
}

impl Default for ElasticCoefficients {
    fn default() -> Self {
        Self::new(0.0, 0.0, Device::Cpu)
    }
}

/// Operations every quantized layer supports on top of [`Module`]
pub trait ElasticLayer: Module {
    /// Clip weight and bias in place into the grid support
    fn clamp(&mut self);

    /// Replace alpha, keeping it on the weight's device
    fn set_alpha(&mut self, alpha: f32);

    /// Replace beta, keeping it on the weight's device
    fn set_beta(&mut self, beta: f32);

    fn alpha(&self) -> f32;

    fn beta(&self) -> f32;

    /// Detached projection of the current weight onto the grid
    fn quantized_weight(&self) -> Tensor;

    /// Grid this layer quantizes to
    fn grid(&self) -> GridSpec;
}

/// Clip every element of `tensor` into `[lo, hi]`
pub(crate) fn clamp_tensor(tensor: &mut Tensor, (lo, hi): (f32, f32)) {
    tensor.data_mut().mapv_inplace(|v| v.clamp(lo, hi));
}

/// Number of elements of `tensor` outside `[lo, hi]`
pub(crate) fn count_outside(tensor: &Tensor, (lo, hi): (f32, f32)) -> usize {
    tensor.data().iter().filter(|&&v| v < lo || v > hi).count()
}
