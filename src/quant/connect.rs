//! Elastic quant-connect operators
//!
//! Differentiable operators that quantize weights on the forward pass and
//! replace the (almost everywhere zero) derivative of rounding with a
//! straight-through surrogate on the backward pass.
//!
//! Both operators share one elastic rule, driven by the scalars alpha and beta:
//!
//! ```text
//! forward:   ŵ = Q(w) + alpha·(w - Q(w))
//! backward:  ∂L/∂w = m(w)·∂L/∂ŵ + beta·(w - Q(w))
//!            m(w) = 1 inside the grid support, alpha outside
//! ```
//!
//! With alpha = beta = 0 this is plain quantization forward and a clipped
//! straight-through estimator backward. Raising alpha softens the forward
//! towards the raw weight; beta adds a pull of every raw weight towards its
//! grid level. Alpha and beta are scheduling knobs and never get gradients.

use super::grid::{GeometricGrid, Grid, LinearGrid};
use crate::autograd::function::{self, required, Function};
use crate::autograd::{linear_forward, linear_grads, Context};
use crate::error::Result;
use crate::Tensor;
use ndarray::ArrayD;

/// First element of a coefficient array (0 when empty)
fn coefficient(values: &ArrayD<f32>) -> f32 {
    values.iter().next().copied().unwrap_or(0.0)
}

/// Elastic forward: returns `(ŵ, Q(w))`
fn elastic_quantize<G: Grid>(grid: &G, weight: &ArrayD<f32>, alpha: f32) -> (ArrayD<f32>, ArrayD<f32>) {
    let quantized = grid.project_array(weight);
    let blended = if alpha == 0.0 {
        quantized.clone()
    } else {
        &quantized + &((weight - &quantized) * alpha)
    };
    (blended, quantized)
}

/// Elastic backward: maps `∂L/∂ŵ` to `∂L/∂w`
fn elastic_surrogate<G: Grid>(
    grid: &G,
    grad_blended: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    quantized: &ArrayD<f32>,
    alpha: f32,
    beta: f32,
) -> ArrayD<f32> {
    let mut grad = grad_blended.clone();
    ndarray::Zip::from(&mut grad)
        .and(weight)
        .and(quantized)
        .for_each(|g, &w, &q| {
            let pass = if grid.contains(w) { 1.0 } else { alpha };
            *g = *g * pass + beta * (w - q);
        });
    grad
}

/// Weight-only quantization operator: `(weight, alpha, beta) -> ŵ`
///
/// Used where the surrounding computation (e.g. a convolution) is an
/// ordinary differentiable op consuming the quantized weight.
#[derive(Debug, Clone)]
pub struct QuantWeight<G: Grid> {
    grid: G,
}

/// Weight quantization on a linear grid
pub type QuantWeightLin = QuantWeight<LinearGrid>;
/// Weight quantization on a geometric grid
pub type QuantWeightExp = QuantWeight<GeometricGrid>;

impl<G: Grid> QuantWeight<G> {
    pub fn new(grid: G) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }

    /// Quantize `weight`, recording the surrogate gradient on the tape
    pub fn apply(&self, weight: &Tensor, alpha: &Tensor, beta: &Tensor) -> Result<Tensor> {
        function::apply(self.clone(), &[Some(weight), Some(alpha), Some(beta)])
    }
}

impl QuantWeightLin {
    pub fn linear(bottom: f32, top: f32, size: usize) -> Self {
        Self::new(LinearGrid::new(bottom, top, size))
    }
}

impl QuantWeightExp {
    pub fn geometric(gamma: f32, init: f32, size: usize) -> Self {
        Self::new(GeometricGrid::new(gamma, init, size))
    }
}

impl<G: Grid> Function for QuantWeight<G> {
    fn name(&self) -> &'static str {
        "quant_weight"
    }

    fn forward(&self, ctx: &mut Context, inputs: &[Option<&ArrayD<f32>>]) -> Result<ArrayD<f32>> {
        let weight = required(self.name(), inputs, 0)?;
        let alpha = coefficient(required(self.name(), inputs, 1)?);
        let beta = coefficient(required(self.name(), inputs, 2)?);

        let (blended, quantized) = elastic_quantize(&self.grid, weight, alpha);

        ctx.save_for_backward(weight.clone());
        ctx.save_for_backward(quantized);
        ctx.save_scalar(alpha);
        ctx.save_scalar(beta);

        Ok(blended)
    }

    fn backward(&self, ctx: &Context, grad_output: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        let (weight, quantized) = match ctx.saved_tensors() {
            [weight, quantized] => (weight, quantized),
            _ => return vec![None, None, None],
        };
        let (alpha, beta) = match ctx.saved_scalars() {
            [alpha, beta] => (*alpha, *beta),
            _ => return vec![None, None, None],
        };

        let grad_weight = elastic_surrogate(&self.grid, grad_output, weight, quantized, alpha, beta);
        vec![Some(grad_weight), None, None]
    }
}

/// Fused quantized dense operator:
/// `(input, weight, bias?, alpha, beta) -> input @ ŵᵀ + bias`
///
/// Gradients for input and bias are the exact dense derivatives taken
/// against ŵ; only the weight gradient goes through the surrogate.
#[derive(Debug, Clone)]
pub struct QuantDense<G: Grid> {
    grid: G,
}

/// Fused dense operator on a linear grid
pub type QuantLinDense = QuantDense<LinearGrid>;
/// Fused dense operator on a geometric grid
pub type QuantLogDense = QuantDense<GeometricGrid>;

impl<G: Grid> QuantDense<G> {
    pub fn new(grid: G) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }

    /// Dense forward with quantized weight, recording the fused backward pass
    pub fn apply(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        alpha: &Tensor,
        beta: &Tensor,
    ) -> Result<Tensor> {
        function::apply(
            self.clone(),
            &[Some(input), Some(weight), bias, Some(alpha), Some(beta)],
        )
    }
}

impl QuantLinDense {
    pub fn linear(bottom: f32, top: f32, size: usize) -> Self {
        Self::new(LinearGrid::new(bottom, top, size))
    }
}

impl QuantLogDense {
    pub fn geometric(gamma: f32, init: f32, size: usize) -> Self {
        Self::new(GeometricGrid::new(gamma, init, size))
    }
}

impl<G: Grid> Function for QuantDense<G> {
    fn name(&self) -> &'static str {
        "quant_dense"
    }

    fn forward(&self, ctx: &mut Context, inputs: &[Option<&ArrayD<f32>>]) -> Result<ArrayD<f32>> {
        let input = required(self.name(), inputs, 0)?;
        let weight = required(self.name(), inputs, 1)?;
        let bias = inputs.get(2).copied().flatten();
        let alpha = coefficient(required(self.name(), inputs, 3)?);
        let beta = coefficient(required(self.name(), inputs, 4)?);

        let (blended, quantized) = elastic_quantize(&self.grid, weight, alpha);
        let output = linear_forward(input, &blended, bias)?;

        ctx.save_for_backward(input.clone());
        ctx.save_for_backward(weight.clone());
        ctx.save_for_backward(quantized);
        ctx.save_for_backward(blended);
        ctx.save_scalar(alpha);
        ctx.save_scalar(beta);

        Ok(output)
    }

    fn backward(&self, ctx: &Context, grad_output: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        let none = || vec![None, None, None, None, None];
        let (input, weight, quantized, blended) = match ctx.saved_tensors() {
            [input, weight, quantized, blended] => (input, weight, quantized, blended),
            _ => return none(),
        };
        let (alpha, beta) = match ctx.saved_scalars() {
            [alpha, beta] => (*alpha, *beta),
            _ => return none(),
        };
        // Exact dense derivatives against ŵ
        let Some((grad_input, grad_blended, grad_bias)) =
            linear_grads(grad_output, input, blended)
        else {
            return none();
        };

        // Straight-through step from ŵ back to w
        let grad_weight =
            elastic_surrogate(&self.grid, &grad_blended, weight, quantized, alpha, beta);

        vec![
            Some(grad_input),
            Some(grad_weight),
            Some(grad_bias),
            None,
            None,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{backward, linear, sum, Device};
    use crate::error::Error;
    use crate::quant::lin_proj;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn matrix(rows: usize, cols: usize, values: Vec<f32>, requires_grad: bool) -> Tensor {
        Tensor::from_shape_vec(&[rows, cols], values, requires_grad).unwrap()
    }

    fn coefficients(alpha: f32, beta: f32) -> (Tensor, Tensor) {
        (Tensor::scalar(alpha), Tensor::scalar(beta))
    }

    #[test]
    fn test_quant_weight_forward_is_projection_at_defaults() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 3);
        let w = matrix(1, 4, vec![0.2, -0.9, 0.4, 1.1], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let q = op.apply(&w, &alpha, &beta).unwrap();

        assert_eq!(q.data(), lin_proj(&w, -1.0, 1.0, 3).data());
        assert!(q.requires_grad());
    }

    #[test]
    fn test_quant_weight_straight_through_inside_support() {
        let op = QuantWeightExp::geometric(2.0, 0.25, 3);
        let w = Tensor::from_vec(vec![0.3, -0.7, 0.05], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let mut q = op.apply(&w, &alpha, &beta).unwrap();
        backward(&mut q, Some(ndarray::arr1(&[2.0, -3.0, 0.5]).into_dyn()));

        let grad = w.grad().unwrap();
        assert_abs_diff_eq!(grad[[0]], 2.0);
        assert_abs_diff_eq!(grad[[1]], -3.0);
        assert_abs_diff_eq!(grad[[2]], 0.5);
    }

    #[test]
    fn test_quant_weight_clips_gradient_outside_support() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 5);
        let w = Tensor::from_vec(vec![1.5, -2.0, 0.5], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let mut q = op.apply(&w, &alpha, &beta).unwrap();
        backward(&mut q, None);

        let grad = w.grad().unwrap();
        assert_abs_diff_eq!(grad[[0]], 0.0);
        assert_abs_diff_eq!(grad[[1]], 0.0);
        assert_abs_diff_eq!(grad[[2]], 1.0);
    }

    #[test]
    fn test_alpha_blends_towards_raw_weight() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 3);
        let w = Tensor::from_vec(vec![0.4, 2.0], true);
        let (alpha, beta) = coefficients(0.5, 0.0);

        let mut q = op.apply(&w, &alpha, &beta).unwrap();
        // 0.4 -> Q=0, halfway is 0.2; 2.0 -> Q=1, halfway is 1.5
        assert_abs_diff_eq!(q.data()[[0]], 0.2);
        assert_abs_diff_eq!(q.data()[[1]], 1.5);

        backward(&mut q, None);
        let grad = w.grad().unwrap();
        assert_abs_diff_eq!(grad[[0]], 1.0);
        // Outside the support only the alpha share of the raw weight passes
        assert_abs_diff_eq!(grad[[1]], 0.5);
    }

    #[test]
    fn test_alpha_one_is_identity_forward() {
        let op = QuantWeightExp::geometric(2.0, 0.25, 4);
        let w = Tensor::from_vec(vec![0.33, -1.7, 0.01], true);
        let (alpha, beta) = coefficients(1.0, 0.0);

        let q = op.apply(&w, &alpha, &beta).unwrap();
        for (a, b) in q.data().iter().zip(w.data().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_beta_pulls_weight_towards_level() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 3);
        let w = Tensor::from_vec(vec![0.3, -0.8], true);
        let (alpha, beta) = coefficients(0.0, 0.1);

        let mut q = op.apply(&w, &alpha, &beta).unwrap();
        backward(&mut q, Some(ndarray::arr1(&[0.0, 0.0]).into_dyn()));

        // Zero upstream gradient leaves only beta·(w - Q(w))
        let grad = w.grad().unwrap();
        assert_abs_diff_eq!(grad[[0]], 0.03, epsilon = 1e-6);
        assert_abs_diff_eq!(grad[[1]], 0.02, epsilon = 1e-6);
    }

    #[test]
    fn test_coefficients_receive_no_gradient() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 3);
        let w = Tensor::from_vec(vec![0.3], true);
        let alpha = Tensor::from_vec(vec![0.2], true);
        let beta = Tensor::from_vec(vec![0.1], true);

        let mut q = op.apply(&w, &alpha, &beta).unwrap();
        backward(&mut q, None);

        assert!(w.grad().is_some());
        assert!(alpha.grad().is_none());
        assert!(beta.grad().is_none());
    }

    #[test]
    fn test_operator_rejects_coefficients_on_other_device() {
        let op = QuantWeightLin::linear(-1.0, 1.0, 3);
        let w = Tensor::from_vec(vec![0.3], true).to(Device::Accelerator(0));
        let (alpha, beta) = coefficients(0.0, 0.0);

        let err = op.apply(&w, &alpha, &beta).unwrap_err();
        assert!(matches!(err, Error::DeviceMismatch { .. }));
    }

    #[test]
    fn test_quant_dense_forward_uses_projected_weight() {
        let op = QuantLinDense::linear(-1.0, 1.0, 3);
        let x = matrix(2, 4, vec![1.0, 2.0, 3.0, 4.0, -1.0, 0.5, 0.0, 2.0], false);
        let w = matrix(1, 4, vec![0.2, -0.9, 0.4, 1.1], true);
        let b = Tensor::from_vec(vec![0.5], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let y = op.apply(&x, &w, Some(&b), &alpha, &beta).unwrap();

        // Row projects to [0, -1, 0, 1]
        assert_eq!(y.shape(), &[2, 1]);
        assert_abs_diff_eq!(y.data()[[0, 0]], -2.0 + 4.0 + 0.5);
        assert_abs_diff_eq!(y.data()[[1, 0]], -0.5 + 2.0 + 0.5);
    }

    #[test]
    fn test_quant_dense_input_and_bias_grads_match_dense_on_quantized_weight() {
        let op = QuantLogDense::geometric(2.0, 0.25, 3);
        let x_vals = vec![0.5, -1.0, 2.0, 0.25, 1.5, -0.5];
        let w_vals = vec![0.3, -0.6, 0.9, 0.1, -0.2, 0.45];
        let (alpha, beta) = coefficients(0.0, 0.0);

        let x = matrix(2, 3, x_vals.clone(), true);
        let w = matrix(2, 3, w_vals.clone(), true);
        let b = Tensor::from_vec(vec![0.1, -0.1], true);
        let mut loss = sum(&op.apply(&x, &w, Some(&b), &alpha, &beta).unwrap());
        backward(&mut loss, None);

        // Reference: ordinary dense op on the projected weight
        let x_ref = matrix(2, 3, x_vals, true);
        let w_q = matrix(2, 3, w_vals, false);
        let w_q = crate::quant::exp_proj(&w_q, 2.0, 0.25, 3);
        let b_ref = Tensor::from_vec(vec![0.1, -0.1], true);
        let mut loss_ref = sum(&linear(&x_ref, &w_q, Some(&b_ref)).unwrap());
        backward(&mut loss_ref, None);

        assert_abs_diff_eq!(loss.item().unwrap(), loss_ref.item().unwrap(), epsilon = 1e-5);
        for (a, r) in x.grad().unwrap().iter().zip(x_ref.grad().unwrap().iter()) {
            assert_abs_diff_eq!(*a, *r, epsilon = 1e-5);
        }
        for (a, r) in b.grad().unwrap().iter().zip(b_ref.grad().unwrap().iter()) {
            assert_abs_diff_eq!(*a, *r, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_quant_dense_weight_grad_is_straight_through() {
        let op = QuantLinDense::linear(-1.0, 1.0, 3);
        let x = matrix(1, 2, vec![3.0, -2.0], false);
        let w = matrix(1, 2, vec![0.1, -0.2], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let mut y = op.apply(&x, &w, None, &alpha, &beta).unwrap();
        backward(&mut y, None);

        // True derivative of rounding is zero; the surrogate passes gᵀx through
        let grad = w.grad().unwrap();
        assert_abs_diff_eq!(grad[[0, 0]], 3.0);
        assert_abs_diff_eq!(grad[[0, 1]], -2.0);
    }

    #[test]
    fn test_quant_dense_without_bias() {
        let op = QuantLinDense::linear(-1.0, 1.0, 5);
        let x = matrix(1, 2, vec![1.0, 1.0], true);
        let w = matrix(3, 2, vec![0.5; 6], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let y = op.apply(&x, &w, None, &alpha, &beta).unwrap();
        assert_eq!(y.shape(), &[1, 3]);
        assert!(y.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_quant_dense_rejects_bad_input_shape() {
        let op = QuantLinDense::linear(-1.0, 1.0, 5);
        let x = matrix(1, 3, vec![1.0; 3], false);
        let w = matrix(2, 2, vec![0.5; 4], true);
        let (alpha, beta) = coefficients(0.0, 0.0);

        let err = op.apply(&x, &w, None, &alpha, &beta).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(100))]

        /// Weights inside the support always get the incoming gradient at defaults
        #[test]
        fn prop_straight_through_inside_support(
            values in prop::collection::vec(-1.0f32..1.0, 1..32),
            upstream in -5.0f32..5.0,
        ) {
            let op = QuantWeightLin::linear(-1.0, 1.0, 4);
            let n = values.len();
            let w = Tensor::from_vec(values, true);
            let (alpha, beta) = coefficients(0.0, 0.0);

            let mut q = op.apply(&w, &alpha, &beta).unwrap();
            backward(&mut q, Some(ArrayD::from_elem(ndarray::IxDyn(&[n]), upstream)));

            for &g in w.grad().unwrap().iter() {
                prop_assert!((g - upstream).abs() < 1e-6);
            }
        }
    }
}
