//! Tests for autograd operations with gradient checking

use super::*;
use crate::error::Error;
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use proptest::prelude::*;

/// Finite difference gradient checker
///
/// Computes numerical gradient using central difference:
/// f'(x) ≈ (f(x + h) - f(x - h)) / (2h)
fn finite_difference<F>(f: F, x: &[f32], epsilon: f32) -> Vec<f32>
where
    F: Fn(&[f32]) -> f32,
{
    let mut grad = vec![0.0; x.len()];
    let mut x_plus = x.to_vec();
    let mut x_minus = x.to_vec();

    for i in 0..x.len() {
        x_plus[i] = x[i] + epsilon;
        x_minus[i] = x[i] - epsilon;

        let f_plus = f(&x_plus);
        let f_minus = f(&x_minus);

        grad[i] = (f_plus - f_minus) / (2.0 * epsilon);

        x_plus[i] = x[i];
        x_minus[i] = x[i];
    }

    grad
}

fn tensor(shape: &[usize], data: Vec<f32>, requires_grad: bool) -> Tensor {
    Tensor::from_shape_vec(shape, data, requires_grad).unwrap()
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        assert_eq!(t.len(), 3);
        assert_eq!(t.shape(), &[3]);
        assert!(t.requires_grad());
        assert!(t.grad().is_none());
        assert_eq!(t.device(), Device::Cpu);
    }

    #[test]
    fn test_from_shape_vec_rejects_wrong_length() {
        let err = Tensor::from_shape_vec(&[2, 3], vec![1.0; 5], false).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_tensor_grad_accumulation() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);

        t.accumulate_grad(ndarray::arr1(&[1.0, 1.0, 1.0]).into_dyn());
        assert_eq!(t.grad().unwrap()[[0]], 1.0);

        t.accumulate_grad(ndarray::arr1(&[1.0, 1.0, 1.0]).into_dyn());
        assert_eq!(t.grad().unwrap()[[0]], 2.0);
    }

    #[test]
    fn test_clones_share_grad_cell() {
        let t = Tensor::from_vec(vec![1.0], true);
        let clone = t.clone();
        clone.set_grad(ndarray::arr1(&[4.0]).into_dyn());
        assert_eq!(t.grad().unwrap()[[0]], 4.0);
    }

    #[test]
    fn test_detach_drops_graph_and_grad() {
        let a = Tensor::from_vec(vec![1.0, -2.0], true);
        let r = relu(&a);
        let d = r.detach();
        assert!(!d.requires_grad());
        assert!(d.backward_op().is_none());
        assert_eq!(d.data(), r.data());
    }

    #[test]
    fn test_to_device_keeps_values() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let moved = a.to(Device::Accelerator(1));
        assert_eq!(moved.device(), Device::Accelerator(1));
        assert_eq!(moved.data(), a.data());
        assert!(moved.requires_grad());
    }

    #[test]
    fn test_add_backward() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let b = Tensor::from_vec(vec![4.0, 5.0, 6.0], true);
        let mut c = add(&a, &b).unwrap();

        assert_abs_diff_eq!(c.data()[[1]], 7.0);

        backward(&mut c, None);

        assert_abs_diff_eq!(a.grad().unwrap()[[0]], 1.0);
        assert_abs_diff_eq!(b.grad().unwrap()[[2]], 1.0);
    }

    #[test]
    fn test_add_rejects_mixed_devices() {
        let a = Tensor::from_vec(vec![1.0], true);
        let b = Tensor::from_vec(vec![1.0], true).to(Device::Accelerator(0));
        let err = add(&a, &b).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceMismatch {
                expected: Device::Cpu,
                got: Device::Accelerator(0)
            }
        ));
    }

    #[test]
    fn test_mul_backward() {
        let a = Tensor::from_vec(vec![2.0, 3.0], true);
        let b = Tensor::from_vec(vec![5.0, 7.0], true);
        let mut c = mul(&a, &b).unwrap();

        backward(&mut c, Some(ndarray::arr1(&[1.0, 1.0]).into_dyn()));

        // ∂(a*b)/∂a = b
        assert_abs_diff_eq!(a.grad().unwrap()[[0]], 5.0);
        assert_abs_diff_eq!(a.grad().unwrap()[[1]], 7.0);
        // ∂(a*b)/∂b = a
        assert_abs_diff_eq!(b.grad().unwrap()[[0]], 2.0);
        assert_abs_diff_eq!(b.grad().unwrap()[[1]], 3.0);
    }

    #[test]
    fn test_relu_backward() {
        let a = Tensor::from_vec(vec![-1.0, 0.0, 1.0, 2.0], true);
        let mut c = relu(&a);

        backward(&mut c, None);

        let grad_a = a.grad().unwrap();
        assert_abs_diff_eq!(grad_a[[0]], 0.0);
        assert_abs_diff_eq!(grad_a[[1]], 0.0);
        assert_abs_diff_eq!(grad_a[[2]], 1.0);
        assert_abs_diff_eq!(grad_a[[3]], 1.0);
    }

    #[test]
    fn test_sum_of_scaled() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let mut s = sum(&scale(&a, 3.0));

        assert_abs_diff_eq!(s.item().unwrap(), 18.0);
        backward(&mut s, None);

        for &g in a.grad().unwrap().iter() {
            assert_abs_diff_eq!(g, 3.0);
        }
    }

    #[test]
    fn test_flatten_shape_and_grad() {
        let a = Tensor::ones(&[2, 3, 2, 2], true);
        let f = flatten(&a).unwrap();
        assert_eq!(f.shape(), &[2, 12]);

        let mut s = sum(&scale(&f, 2.0));
        backward(&mut s, None);
        let grad = a.grad().unwrap();
        assert_eq!(grad.shape(), &[2, 3, 2, 2]);
        assert!(grad.iter().all(|&g| (g - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_linear_forward() {
        let x = tensor(&[1, 2], vec![1.0, 2.0], false);
        let w = tensor(&[3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], false);
        let b = Tensor::from_vec(vec![0.5, -0.5, 0.0], false);

        let y = linear(&x, &w, Some(&b)).unwrap();

        assert_eq!(y.shape(), &[1, 3]);
        assert_abs_diff_eq!(y.data()[[0, 0]], 1.5);
        assert_abs_diff_eq!(y.data()[[0, 1]], 1.5);
        assert_abs_diff_eq!(y.data()[[0, 2]], 3.0);
    }

    #[test]
    fn test_linear_rejects_feature_mismatch() {
        let x = tensor(&[1, 3], vec![1.0, 2.0, 3.0], false);
        let w = tensor(&[2, 2], vec![1.0; 4], false);
        assert!(matches!(
            linear(&x, &w, None).unwrap_err(),
            Error::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_linear_backward_matches_finite_difference() {
        let x_vals = vec![0.3, -1.2, 0.8, 0.5, 0.1, -0.7];
        let w_vals = vec![0.2, -0.4, 0.9, 0.6, 0.1, -0.3];
        let b_vals = vec![0.05, -0.1];

        let x = tensor(&[2, 3], x_vals.clone(), true);
        let w = tensor(&[2, 3], w_vals.clone(), true);
        let b = Tensor::from_vec(b_vals.clone(), true);
        let mut loss = sum(&linear(&x, &w, Some(&b)).unwrap());
        backward(&mut loss, None);

        let numeric_w = finite_difference(
            |wv| {
                let w = tensor(&[2, 3], wv.to_vec(), false);
                let x = tensor(&[2, 3], x_vals.clone(), false);
                let b = Tensor::from_vec(b_vals.clone(), false);
                linear(&x, &w, Some(&b)).unwrap().data().sum()
            },
            &w_vals,
            1e-3,
        );
        for (a, n) in w.grad().unwrap().iter().zip(numeric_w.iter()) {
            assert_abs_diff_eq!(*a, *n, epsilon = 1e-2);
        }

        let numeric_x = finite_difference(
            |xv| {
                let w = tensor(&[2, 3], w_vals.clone(), false);
                let x = tensor(&[2, 3], xv.to_vec(), false);
                linear(&x, &w, None).unwrap().data().sum()
            },
            &x_vals,
            1e-3,
        );
        for (a, n) in x.grad().unwrap().iter().zip(numeric_x.iter()) {
            assert_abs_diff_eq!(*a, *n, epsilon = 1e-2);
        }

        // Bias gradient is the batch size for a summed output
        for &g in b.grad().unwrap().iter() {
            assert_abs_diff_eq!(g, 2.0);
        }
    }

    #[test]
    fn test_conv_output_size() {
        assert_eq!(conv_output_size(5, 3, 1, 0, 1), Some(3));
        assert_eq!(conv_output_size(5, 3, 1, 1, 1), Some(5));
        assert_eq!(conv_output_size(7, 3, 2, 0, 1), Some(3));
        assert_eq!(conv_output_size(7, 3, 1, 0, 2), Some(3));
        assert_eq!(conv_output_size(2, 3, 1, 0, 1), None);
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let x = tensor(&[1, 1, 3, 3], (1..=9).map(|v| v as f32).collect(), false);
        let w = tensor(&[1, 1, 1, 1], vec![2.0], false);
        let b = Tensor::from_vec(vec![1.0], false);

        let y = conv2d(&x, &w, Some(&b), Conv2dOptions::default()).unwrap();

        assert_eq!(y.shape(), &[1, 1, 3, 3]);
        assert_abs_diff_eq!(y.data()[[0, 0, 0, 0]], 3.0);
        assert_abs_diff_eq!(y.data()[[0, 0, 2, 2]], 19.0);
    }

    #[test]
    fn test_conv2d_padding_and_stride() {
        let x = Tensor::ones(&[1, 1, 4, 4], false);
        let w = Tensor::ones(&[1, 1, 3, 3], false);
        let options = Conv2dOptions {
            stride: [2, 2],
            padding: [1, 1],
            ..Conv2dOptions::default()
        };

        let y = conv2d(&x, &w, None, options).unwrap();

        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        // Top-left window overlaps 2x2 real pixels, the next one 2x3
        assert_abs_diff_eq!(y.data()[[0, 0, 0, 0]], 4.0);
        assert_abs_diff_eq!(y.data()[[0, 0, 0, 1]], 6.0);
    }

    #[test]
    fn test_conv2d_groups_keep_channels_apart() {
        // Two groups: output 0 only sees input channel 0, output 1 only channel 1
        let x = tensor(&[1, 2, 1, 1], vec![3.0, 5.0], false);
        let w = tensor(&[2, 1, 1, 1], vec![1.0, 10.0], false);
        let options = Conv2dOptions {
            groups: 2,
            ..Conv2dOptions::default()
        };

        let y = conv2d(&x, &w, None, options).unwrap();

        assert_abs_diff_eq!(y.data()[[0, 0, 0, 0]], 3.0);
        assert_abs_diff_eq!(y.data()[[0, 1, 0, 0]], 50.0);
    }

    #[test]
    fn test_conv2d_rejects_bad_groups() {
        let x = Tensor::ones(&[1, 3, 4, 4], false);
        let w = Tensor::ones(&[2, 1, 3, 3], false);
        let options = Conv2dOptions {
            groups: 2,
            ..Conv2dOptions::default()
        };
        assert!(matches!(
            conv2d(&x, &w, None, options).unwrap_err(),
            Error::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_conv2d_kernel_larger_than_input() {
        let x = Tensor::ones(&[1, 1, 2, 2], false);
        let w = Tensor::ones(&[1, 1, 3, 3], false);
        assert!(matches!(
            conv2d(&x, &w, None, Conv2dOptions::default()).unwrap_err(),
            Error::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_conv2d_backward_matches_finite_difference() {
        let x_vals: Vec<f32> = (0..2 * 2 * 4 * 4).map(|i| ((i as f32) * 0.37).sin()).collect();
        let w_vals: Vec<f32> = (0..3 * 2 * 3 * 3).map(|i| ((i as f32) * 0.53).cos() * 0.5).collect();
        let options = Conv2dOptions {
            stride: [1, 2],
            padding: [1, 1],
            dilation: [1, 1],
            groups: 1,
        };

        let x = tensor(&[2, 2, 4, 4], x_vals.clone(), true);
        let w = tensor(&[3, 2, 3, 3], w_vals.clone(), true);
        let b = Tensor::from_vec(vec![0.1, -0.2, 0.3], true);
        let mut loss = sum(&conv2d(&x, &w, Some(&b), options).unwrap());
        backward(&mut loss, None);

        let numeric_w = finite_difference(
            |wv| {
                let x = tensor(&[2, 2, 4, 4], x_vals.clone(), false);
                let w = tensor(&[3, 2, 3, 3], wv.to_vec(), false);
                conv2d(&x, &w, None, options).unwrap().data().sum()
            },
            &w_vals,
            1e-2,
        );
        for (a, n) in w.grad().unwrap().iter().zip(numeric_w.iter()) {
            assert_abs_diff_eq!(*a, *n, epsilon = 5e-2);
        }

        let numeric_x = finite_difference(
            |xv| {
                let x = tensor(&[2, 2, 4, 4], xv.to_vec(), false);
                let w = tensor(&[3, 2, 3, 3], w_vals.clone(), false);
                conv2d(&x, &w, None, options).unwrap().data().sum()
            },
            &x_vals,
            1e-2,
        );
        for (a, n) in x.grad().unwrap().iter().zip(numeric_x.iter()) {
            assert_abs_diff_eq!(*a, *n, epsilon = 5e-2);
        }

        // Each bias sees every output position of its channel: batch 2 × 4 × 2
        for &g in b.grad().unwrap().iter() {
            assert_abs_diff_eq!(g, 16.0);
        }
    }
}

#[cfg(test)]
mod function_tests {
    use super::*;
    use crate::error::Result;

    /// y = 2x, with a deliberately different backward rule (pass-through)
    #[derive(Clone)]
    struct DoubleWithIdentityGrad;

    impl Function for DoubleWithIdentityGrad {
        fn name(&self) -> &'static str {
            "double"
        }

        fn forward(&self, ctx: &mut Context, inputs: &[Option<&ArrayD<f32>>]) -> Result<ArrayD<f32>> {
            let x = function::required(self.name(), inputs, 0)?;
            ctx.save_scalar(2.0);
            Ok(x * 2.0)
        }

        fn backward(&self, ctx: &Context, grad_output: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
            assert_eq!(ctx.saved_scalars(), &[2.0]);
            vec![Some(grad_output.clone()), None]
        }
    }

    #[test]
    fn test_custom_function_uses_custom_backward() {
        let x = Tensor::from_vec(vec![1.0, -3.0], true);
        let mut y = apply(DoubleWithIdentityGrad, &[Some(&x)]).unwrap();

        assert_abs_diff_eq!(y.data()[[1]], -6.0);
        backward(&mut y, None);

        // Custom rule says 1, not the true derivative 2
        for &g in x.grad().unwrap().iter() {
            assert_abs_diff_eq!(g, 1.0);
        }
    }

    #[test]
    fn test_custom_function_missing_input() {
        let err = apply(DoubleWithIdentityGrad, &[None]).unwrap_err();
        assert!(matches!(err, Error::MissingInput { op: "double", index: 0 }));
    }

    #[test]
    fn test_custom_function_device_mismatch() {
        let x = Tensor::from_vec(vec![1.0], true);
        let other = Tensor::scalar(0.0).to(Device::Accelerator(2));
        let err = apply(DoubleWithIdentityGrad, &[Some(&x), Some(&other)]).unwrap_err();
        assert!(matches!(err, Error::DeviceMismatch { .. }));
    }

    #[test]
    fn test_custom_function_output_inherits_device() {
        let x = Tensor::from_vec(vec![1.0], false).to(Device::Accelerator(3));
        let y = apply(DoubleWithIdentityGrad, &[Some(&x)]).unwrap();
        assert_eq!(y.device(), Device::Accelerator(3));
        assert!(y.backward_op().is_none());
    }

    #[test]
    fn test_chain_through_custom_function() {
        let x = Tensor::from_vec(vec![-1.0, 2.0], true);
        let doubled = apply(DoubleWithIdentityGrad, &[Some(&x)]).unwrap();
        let mut out = sum(&relu(&doubled));
        backward(&mut out, None);

        let grad = x.grad().unwrap();
        assert_abs_diff_eq!(grad[[0]], 0.0);
        assert_abs_diff_eq!(grad[[1]], 1.0);
    }
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(100))]

    #[test]
    fn prop_mul_gradient_matches_finite_difference(
        a in prop::collection::vec(-5.0f32..5.0, 1..8),
    ) {
        let b: Vec<f32> = a.iter().map(|v| v * 0.5 + 1.0).collect();
        let ta = Tensor::from_vec(a.clone(), true);
        let tb = Tensor::from_vec(b.clone(), false);
        let mut loss = sum(&mul(&ta, &tb).unwrap());
        backward(&mut loss, None);

        let numeric = finite_difference(
            |x| x.iter().zip(b.iter()).map(|(p, q)| p * q).sum(),
            &a,
            1e-2,
        );
        let analytic = ta.grad().unwrap();
        for (g, n) in analytic.iter().zip(numeric.iter()) {
            prop_assert!((g - n).abs() < 1e-2);
        }
    }

    #[test]
    fn prop_flatten_preserves_values(
        n in 1usize..4,
        c in 1usize..4,
        hw in 1usize..4,
    ) {
        let len = n * c * hw * hw;
        let values: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let t = tensor(&[n, c, hw, hw], values.clone(), false);
        let f = flatten(&t).unwrap();
        prop_assert_eq!(f.shape(), &[n, c * hw * hw]);
        let flat: Vec<f32> = f.data().iter().copied().collect();
        prop_assert_eq!(flat, values);
    }
}

#[test]
fn test_backward_default_seed_matches_shape() {
    let a = Tensor::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0], true).unwrap();
    let mut r = relu(&a);
    backward(&mut r, None);
    assert_eq!(a.grad().unwrap(), ArrayD::<f32>::ones(IxDyn(&[2, 2])));
}
