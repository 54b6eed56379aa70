//! Tape-based autograd engine
//!
//! Provides automatic differentiation over n-dimensional tensors using a
//! computational graph with gradient tape, plus the [`Function`] mechanism
//! for operators that bring their own gradient rule.

mod backward;
mod context;
mod device;
pub mod function;
mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::BackwardOp;
pub use context::Context;
pub use device::Device;
pub use function::{apply, Function};
pub use ops::*;
pub(crate) use ops::{linear_forward, linear_grads};
pub use tensor::{GradCell, Tensor};

use ndarray::ArrayD;

/// Perform backward pass on a tensor
///
/// `grad_output` defaults to ones of the tensor's shape, which is the seed
/// for a scalar loss.
pub fn backward(tensor: &mut Tensor, grad_output: Option<ArrayD<f32>>) {
    let grad = grad_output.unwrap_or_else(|| ArrayD::ones(tensor.data().raw_dim()));
    tensor.set_grad(grad);

    if let Some(op) = tensor.backward_op() {
        op.backward();
    }
}
