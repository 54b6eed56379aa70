//! User-defined differentiable operations
//!
//! A [`Function`] supplies its own forward computation and its own gradient
//! rule. [`apply`] runs the forward pass and records a tape node that calls
//! the custom backward pass, which is how operators whose true derivative is
//! useless (e.g. rounding to a grid) take part in training.

use super::{BackwardOp, Context, Device, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::ArrayD;
use std::rc::Rc;

/// Custom forward/backward pair
pub trait Function {
    /// Operator name, used in errors and diagnostics
    fn name(&self) -> &'static str;

    /// Compute the output from the inputs
    ///
    /// `None` marks an absent optional input (such as a disabled bias).
    fn forward(&self, ctx: &mut Context, inputs: &[Option<&ArrayD<f32>>]) -> Result<ArrayD<f32>>;

    /// Map the output gradient to one gradient per input
    ///
    /// A `None` entry means the input receives no gradient.
    fn backward(&self, ctx: &Context, grad_output: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>>;
}

/// Fetch a required input or fail with [`Error::MissingInput`]
pub fn required<'a>(
    op: &'static str,
    inputs: &[Option<&'a ArrayD<f32>>],
    index: usize,
) -> Result<&'a ArrayD<f32>> {
    inputs
        .get(index)
        .copied()
        .flatten()
        .ok_or(Error::MissingInput { op, index })
}

/// Check that every present tensor sits on the same device
pub fn common_device(inputs: &[Option<&Tensor>]) -> Result<Device> {
    let mut present = inputs.iter().flatten();
    let device = match present.next() {
        Some(first) => first.device(),
        None => return Ok(Device::Cpu),
    };
    for tensor in present {
        if tensor.device() != device {
            return Err(Error::DeviceMismatch {
                expected: device,
                got: tensor.device(),
            });
        }
    }
    Ok(device)
}

/// Run `function` on `inputs` and record its backward pass on the tape
pub fn apply<F: Function + 'static>(function: F, inputs: &[Option<&Tensor>]) -> Result<Tensor> {
    let device = common_device(inputs)?;

    let arrays: Vec<Option<&ArrayD<f32>>> = inputs.iter().map(|t| t.map(Tensor::data)).collect();
    let mut ctx = Context::new();
    let data = function.forward(&mut ctx, &arrays)?;

    let requires_grad = inputs.iter().flatten().any(|t| t.requires_grad());
    let mut result = Tensor::with_data_on_device(data, requires_grad, device);

    if requires_grad {
        let backward_op = Rc::new(FunctionBackward {
            function,
            ctx,
            inputs: inputs.iter().map(|t| t.cloned()).collect(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct FunctionBackward<F: Function> {
    function: F,
    ctx: Context,
    inputs: Vec<Option<Tensor>>,
    result_grad: GradCell,
}

impl<F: Function> BackwardOp for FunctionBackward<F> {
    fn backward(&self) {
        let grads = match self.result_grad.borrow().as_ref() {
            Some(grad_output) => self.function.backward(&self.ctx, grad_output),
            None => return,
        };

        for (input, grad) in self.inputs.iter().zip(grads) {
            if let (Some(input), Some(grad)) = (input, grad) {
                if input.requires_grad() {
                    input.accumulate_grad(grad);
                }
            }
        }

        for input in self.inputs.iter().flatten() {
            if let Some(op) = input.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        self.function.name()
    }
}
