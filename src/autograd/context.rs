//! Saved state handed from a custom forward pass to its backward pass

use ndarray::ArrayD;

/// Values a [`Function`](super::Function) keeps between forward and backward
///
/// The forward pass stores whatever its backward pass needs; the backward
/// pass reads them back in the same order. Nothing else is captured.
#[derive(Debug, Default, Clone)]
pub struct Context {
    tensors: Vec<ArrayD<f32>>,
    scalars: Vec<f32>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an array for the backward pass
    pub fn save_for_backward(&mut self, tensor: ArrayD<f32>) {
        self.tensors.push(tensor);
    }

    /// Arrays saved by the forward pass, in save order
    pub fn saved_tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    /// Keep a scalar for the backward pass
    pub fn save_scalar(&mut self, value: f32) {
        self.scalars.push(value);
    }

    /// Scalars saved by the forward pass, in save order
    pub fn saved_scalars(&self) -> &[f32] {
        &self.scalars
    }
}
