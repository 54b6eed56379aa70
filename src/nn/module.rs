//! Callable module contract shared by every layer

use super::Mode;
use crate::autograd::Device;
use crate::error::Result;
use crate::Tensor;

/// A layer that maps an input tensor to an output tensor and owns its parameters
pub trait Module {
    /// Run the layer on `input`
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Switch between training and evaluation
    fn set_mode(&mut self, mode: Mode);

    /// Current mode
    fn mode(&self) -> Mode;

    /// Trainable tensors in registration order
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable access to trainable tensors, same order as [`Module::parameters`]
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Move every owned tensor to `device`
    fn to_device(&mut self, device: Device);

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}
