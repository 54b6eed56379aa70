//! Autograd operations with backward passes

use super::function::common_device;
use super::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::{Array2, Array4, ArrayD, Axis, Ix2, Ix4, IxDyn};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

fn check_same_shape(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }
    Ok(())
}

fn as_matrix(data: &ArrayD<f32>) -> Result<Array2<f32>> {
    data.view()
        .into_dimensionality::<Ix2>()
        .map(|m| m.to_owned())
        .map_err(|_| Error::ShapeMismatch {
            expected: vec![0, 0],
            got: data.shape().to_vec(),
        })
}

fn as_4d(data: &ArrayD<f32>) -> Result<Array4<f32>> {
    data.view()
        .into_dimensionality::<Ix4>()
        .map(|m| m.to_owned())
        .map_err(|_| Error::ShapeMismatch {
            expected: vec![0, 0, 0, 0],
            got: data.shape().to_vec(),
        })
}

/// Add two tensors of the same shape
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let device = common_device(&[Some(a), Some(b)])?;
    check_same_shape(a, b)?;

    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, device);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }

            // Recursively call backward on inputs
            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
            if let Some(op) = self.b.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "add"
    }
}

/// Multiply two tensors element-wise
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let device = common_device(&[Some(a), Some(b)])?;
    check_same_shape(a, b)?;

    let data = a.data() * b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, device);

    if requires_grad {
        let backward_op = Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * b
                self.a.accumulate_grad(grad * self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = ∂L/∂out * a
                self.b.accumulate_grad(grad * self.a.data());
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
            if let Some(op) = self.b.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "mul"
    }
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, a.device());

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * factor
                self.a.accumulate_grad(grad * self.factor);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "scale"
    }
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, a.device());

    if requires_grad {
        let backward_op = Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (a > 0)
                let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &mask);
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "relu"
    }
}

/// Sum all elements into a one-element tensor
pub fn sum(a: &Tensor) -> Tensor {
    let data = ArrayD::from_elem(IxDyn(&[1]), a.data().sum());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, a.device());

    if requires_grad {
        let backward_op = Rc::new(SumBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SumBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SumBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂sum * 1 (broadcast)
                let grad_val = grad.iter().next().copied().unwrap_or(0.0);
                self.a
                    .accumulate_grad(ArrayD::from_elem(self.a.data().raw_dim(), grad_val));
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "sum"
    }
}

/// Collapse every dimension after the first: `[N, ...] -> [N, prod(...)]`
pub fn flatten(a: &Tensor) -> Result<Tensor> {
    let shape = a.shape().to_vec();
    let batch = *shape.first().ok_or_else(|| Error::ShapeMismatch {
        expected: vec![0, 0],
        got: shape.clone(),
    })?;
    let features: usize = shape[1..].iter().product();

    let data = a
        .data()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&[batch, features]))
        .map_err(|_| Error::ShapeMismatch {
            expected: vec![batch, features],
            got: shape.clone(),
        })?;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::with_data_on_device(data, requires_grad, a.device());

    if requires_grad {
        let backward_op = Rc::new(FlattenBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct FlattenBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for FlattenBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                if let Ok(grad_a) = grad
                    .as_standard_layout()
                    .into_owned()
                    .into_shape_with_order(self.a.data().raw_dim())
                {
                    self.a.accumulate_grad(grad_a);
                }
            }

            if let Some(op) = self.a.backward_op() {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "flatten"
    }
}

/// Dense layer computation: `y = x @ Wᵀ + b`
///
/// * `input` - `[batch, in_features]`
/// * `weight` - `[out_features, in_features]`
/// * `bias` - optional `[out_features]`
///
/// Returns `[batch, out_features]`.
pub fn linear(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let device = common_device(&[Some(input), Some(weight), bias])?;
    let data = linear_forward(input.data(), weight.data(), bias.map(Tensor::data))?;

    let requires_grad = input.requires_grad()
        || weight.requires_grad()
        || bias.is_some_and(Tensor::requires_grad);
    let mut result = Tensor::with_data_on_device(data, requires_grad, device);

    if requires_grad {
        let backward_op = Rc::new(LinearBackward {
            input: input.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Forward math shared by [`linear`] and the fused quantized dense operator
pub(crate) fn linear_forward(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
) -> Result<ArrayD<f32>> {
    let x = as_matrix(input)?;
    let w = as_matrix(weight)?;
    if x.ncols() != w.ncols() {
        return Err(Error::ShapeMismatch {
            expected: vec![x.nrows(), w.ncols()],
            got: input.shape().to_vec(),
        });
    }

    let mut y = x.dot(&w.t());
    if let Some(b) = bias {
        if b.len() != w.nrows() {
            return Err(Error::ShapeMismatch {
                expected: vec![w.nrows()],
                got: b.shape().to_vec(),
            });
        }
        for mut row in y.rows_mut() {
            row.iter_mut().zip(b.iter()).for_each(|(v, &bv)| *v += bv);
        }
    }

    Ok(y.into_dyn())
}

/// Gradients of `y = x @ Wᵀ + b` given `∂L/∂y`
///
/// Returns `(∂L/∂x, ∂L/∂W, ∂L/∂b)`.
pub(crate) fn linear_grads(
    grad_output: &ArrayD<f32>,
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
) -> Option<(ArrayD<f32>, ArrayD<f32>, ArrayD<f32>)> {
    let g = as_matrix(grad_output).ok()?;
    let x = as_matrix(input).ok()?;
    let w = as_matrix(weight).ok()?;

    // ∂L/∂x = ∂L/∂y @ W, ∂L/∂W = (∂L/∂y)ᵀ @ x, ∂L/∂b = Σ_batch ∂L/∂y
    let grad_input = g.dot(&w).into_dyn();
    let grad_weight = g.t().dot(&x).into_dyn();
    let grad_bias = g.sum_axis(Axis(0)).into_dyn();

    Some((grad_input, grad_weight, grad_bias))
}

struct LinearBackward {
    input: Tensor,
    weight: Tensor,
    bias: Option<Tensor>,
    result_grad: GradCell,
}

impl BackwardOp for LinearBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if let Some((grad_input, grad_weight, grad_bias)) =
                linear_grads(grad_output, self.input.data(), self.weight.data())
            {
                if self.input.requires_grad() {
                    self.input.accumulate_grad(grad_input);
                }
                if self.weight.requires_grad() {
                    self.weight.accumulate_grad(grad_weight);
                }
                if let Some(bias) = self.bias.as_ref().filter(|b| b.requires_grad()) {
                    bias.accumulate_grad(grad_bias);
                }
            }

            if let Some(op) = self.input.backward_op() {
                op.backward();
            }
            if let Some(op) = self.weight.backward_op() {
                op.backward();
            }
            if let Some(op) = self.bias.as_ref().and_then(Tensor::backward_op) {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

/// Hyper-parameters of a 2-D convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dOptions {
    /// Step between kernel applications, `[height, width]`
    pub stride: [usize; 2],
    /// Zero padding added on both sides, `[height, width]`
    pub padding: [usize; 2],
    /// Spacing between kernel taps, `[height, width]`
    pub dilation: [usize; 2],
    /// Number of channel groups
    pub groups: usize,
}

impl Default for Conv2dOptions {
    fn default() -> Self {
        Self {
            stride: [1, 1],
            padding: [0, 0],
            dilation: [1, 1],
            groups: 1,
        }
    }
}

/// Output spatial size of one convolution axis
///
/// `floor((in + 2·padding - dilation·(kernel - 1) - 1) / stride) + 1`, or
/// `None` when the kernel does not fit.
pub fn conv_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    if stride == 0 || dilation == 0 || kernel_size == 0 {
        return None;
    }
    let effective = input_size + 2 * padding;
    let kernel_extent = dilation * (kernel_size - 1) + 1;
    if effective < kernel_extent {
        return None;
    }
    Some((effective - kernel_extent) / stride + 1)
}

/// Resolved geometry of one conv2d call
#[derive(Debug, Clone, Copy)]
struct ConvGeometry {
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    in_per_group: usize,
    out_per_group: usize,
    in_h: usize,
    in_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    out_h: usize,
    out_w: usize,
    options: Conv2dOptions,
}

impl ConvGeometry {
    fn resolve(x: &Array4<f32>, w: &Array4<f32>, options: Conv2dOptions) -> Result<Self> {
        let (batch, in_channels, in_h, in_w) = x.dim();
        let (out_channels, in_per_group, kernel_h, kernel_w) = w.dim();
        let groups = options.groups;

        if groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![out_channels, in_channels / groups.max(1), kernel_h, kernel_w],
                got: vec![out_channels, in_per_group, kernel_h, kernel_w],
            });
        }
        if in_per_group != in_channels / groups {
            return Err(Error::ShapeMismatch {
                expected: vec![out_channels, in_channels / groups, kernel_h, kernel_w],
                got: vec![out_channels, in_per_group, kernel_h, kernel_w],
            });
        }

        let out_h = conv_output_size(
            in_h,
            kernel_h,
            options.stride[0],
            options.padding[0],
            options.dilation[0],
        );
        let out_w = conv_output_size(
            in_w,
            kernel_w,
            options.stride[1],
            options.padding[1],
            options.dilation[1],
        );
        let (out_h, out_w) = match (out_h, out_w) {
            (Some(h), Some(w)) if h > 0 && w > 0 => (h, w),
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "conv2d kernel {kernel_h}x{kernel_w} does not fit input {in_h}x{in_w} with {options:?}"
                )))
            }
        };

        Ok(Self {
            batch,
            in_channels,
            out_channels,
            in_per_group,
            out_per_group: out_channels / groups,
            in_h,
            in_w,
            kernel_h,
            kernel_w,
            out_h,
            out_w,
            options,
        })
    }

    /// Input coordinate hit by kernel tap `k` at output position `o`
    fn input_index(&self, o: usize, k: usize, axis: usize) -> Option<usize> {
        let pos = (o * self.options.stride[axis] + k * self.options.dilation[axis]) as isize
            - self.options.padding[axis] as isize;
        let limit = if axis == 0 { self.in_h } else { self.in_w };
        (pos >= 0 && (pos as usize) < limit).then_some(pos as usize)
    }
}

/// 2-D convolution over `[batch, channels, height, width]` input
///
/// * `weight` - `[out_channels, in_channels / groups, kernel_h, kernel_w]`
/// * `bias` - optional `[out_channels]`
pub fn conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    options: Conv2dOptions,
) -> Result<Tensor> {
    let device = common_device(&[Some(input), Some(weight), bias])?;
    let x = as_4d(input.data())?;
    let w = as_4d(weight.data())?;
    let geometry = ConvGeometry::resolve(&x, &w, options)?;

    if let Some(b) = bias {
        if b.len() != geometry.out_channels {
            return Err(Error::ShapeMismatch {
                expected: vec![geometry.out_channels],
                got: b.shape().to_vec(),
            });
        }
    }

    let bias_vals: Option<Vec<f32>> = bias.map(|b| b.data().iter().copied().collect());
    let mut out = Array4::<f32>::zeros((
        geometry.batch,
        geometry.out_channels,
        geometry.out_h,
        geometry.out_w,
    ));
    for n in 0..geometry.batch {
        for oc in 0..geometry.out_channels {
            let group = oc / geometry.out_per_group;
            let bias_val = bias_vals.as_ref().map_or(0.0, |b| b[oc]);
            for oh in 0..geometry.out_h {
                for ow in 0..geometry.out_w {
                    let mut acc = bias_val;
                    for icl in 0..geometry.in_per_group {
                        let ic = group * geometry.in_per_group + icl;
                        for kh in 0..geometry.kernel_h {
                            let Some(ih) = geometry.input_index(oh, kh, 0) else {
                                continue;
                            };
                            for kw in 0..geometry.kernel_w {
                                let Some(iw) = geometry.input_index(ow, kw, 1) else {
                                    continue;
                                };
                                acc += x[[n, ic, ih, iw]] * w[[oc, icl, kh, kw]];
                            }
                        }
                    }
                    out[[n, oc, oh, ow]] = acc;
                }
            }
        }
    }

    let requires_grad = input.requires_grad()
        || weight.requires_grad()
        || bias.is_some_and(Tensor::requires_grad);
    let mut result = Tensor::with_data_on_device(out.into_dyn(), requires_grad, device);

    if requires_grad {
        let backward_op = Rc::new(Conv2dBackward {
            input: input.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            x,
            w,
            geometry,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct Conv2dBackward {
    input: Tensor,
    weight: Tensor,
    bias: Option<Tensor>,
    x: Array4<f32>,
    w: Array4<f32>,
    geometry: ConvGeometry,
    result_grad: GradCell,
}

impl BackwardOp for Conv2dBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if let Ok(g) = as_4d(grad_output) {
                let geo = &self.geometry;
                let mut grad_x = Array4::<f32>::zeros(self.x.raw_dim());
                let mut grad_w = Array4::<f32>::zeros(self.w.raw_dim());
                let mut grad_b = vec![0.0f32; geo.out_channels];

                // Every tap of the forward sum contributes g·w to ∂L/∂x and g·x to ∂L/∂w
                for n in 0..geo.batch {
                    for oc in 0..geo.out_channels {
                        let group = oc / geo.out_per_group;
                        for oh in 0..geo.out_h {
                            for ow in 0..geo.out_w {
                                let go = g[[n, oc, oh, ow]];
                                grad_b[oc] += go;
                                for icl in 0..geo.in_per_group {
                                    let ic = group * geo.in_per_group + icl;
                                    for kh in 0..geo.kernel_h {
                                        let Some(ih) = geo.input_index(oh, kh, 0) else {
                                            continue;
                                        };
                                        for kw in 0..geo.kernel_w {
                                            let Some(iw) = geo.input_index(ow, kw, 1) else {
                                                continue;
                                            };
                                            grad_x[[n, ic, ih, iw]] += go * self.w[[oc, icl, kh, kw]];
                                            grad_w[[oc, icl, kh, kw]] += go * self.x[[n, ic, ih, iw]];
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                debug_assert_eq!(grad_x.dim().1, geo.in_channels);

                if self.input.requires_grad() {
                    self.input.accumulate_grad(grad_x.into_dyn());
                }
                if self.weight.requires_grad() {
                    self.weight.accumulate_grad(grad_w.into_dyn());
                }
                if let Some(bias) = self.bias.as_ref().filter(|b| b.requires_grad()) {
                    bias.accumulate_grad(ndarray::Array1::from(grad_b).into_dyn());
                }
            }

            if let Some(op) = self.input.backward_op() {
                op.backward();
            }
            if let Some(op) = self.weight.backward_op() {
                op.backward();
            }
            if let Some(op) = self.bias.as_ref().and_then(Tensor::backward_op) {
                op.backward();
            }
        }
    }

    fn name(&self) -> &'static str {
        "conv2d"
    }
}
