//! Loss functions for training

use crate::autograd::function::common_device;
use crate::autograd::{BackwardOp, GradCell};
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::ArrayD;
use std::rc::Rc;

/// Trait for loss functions
pub trait LossFn {
    /// Compute a one-element loss tensor from predictions and targets
    ///
    /// When `predictions` requires a gradient, the loss carries a backward
    /// node that feeds the predictions' graph.
    fn forward(&self, predictions: &Tensor, targets: &Tensor) -> Result<Tensor>;

    /// Name of the loss function
    fn name(&self) -> &str;
}

/// Mean Squared Error Loss
///
/// L = mean((predictions - targets)²)
///
/// # Example
///
/// ```
/// use elastiq::train::{LossFn, MSELoss};
/// use elastiq::Tensor;
///
/// let pred = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
/// let target = Tensor::from_vec(vec![1.5, 2.5, 3.5], false);
///
/// let loss = MSELoss.forward(&pred, &target).unwrap();
/// assert!((loss.item().unwrap() - 0.25).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MSELoss;

impl LossFn for MSELoss {
    fn forward(&self, predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let device = common_device(&[Some(predictions), Some(targets)])?;
        if predictions.shape() != targets.shape() {
            return Err(Error::ShapeMismatch {
                expected: predictions.shape().to_vec(),
                got: targets.shape().to_vec(),
            });
        }

        let diff = predictions.data() - targets.data();
        let mse = (&diff * &diff).mean().unwrap_or(0.0);

        let requires_grad = predictions.requires_grad();
        let mut loss = Tensor::with_data_on_device(
            ndarray::arr1(&[mse]).into_dyn(),
            requires_grad,
            device,
        );

        if requires_grad {
            // d(MSE)/d(pred) = 2 * (pred - target) / n
            let n = predictions.len().max(1) as f32;
            loss.set_backward_op(Rc::new(MSEBackward {
                predictions: predictions.clone(),
                grad: diff * (2.0 / n),
                result_grad: loss.grad_cell(),
            }));
        }

        Ok(loss)
    }

    fn name(&self) -> &str {
        "MSE"
    }
}

struct MSEBackward {
    predictions: Tensor,
    grad: ArrayD<f32>,
    result_grad: GradCell,
}

impl BackwardOp for MSEBackward {
    fn backward(&self) {
        let scale = match self.result_grad.borrow().as_ref() {
            Some(g) => g.iter().next().copied().unwrap_or(1.0),
            None => return,
        };

        self.predictions.accumulate_grad(&self.grad * scale);
        if let Some(op) = self.predictions.backward_op() {
            op.backward();
        }
    }

    fn name(&self) -> &'static str {
        "mse"
    }
}
