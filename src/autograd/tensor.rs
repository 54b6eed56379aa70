//! Tensor type with gradient tracking

use super::{BackwardOp, Device};
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayD, IxDyn};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared gradient slot of a tensor
pub type GradCell = Rc<RefCell<Option<ArrayD<f32>>>>;

/// Tensor with automatic differentiation support
///
/// Clones share the gradient cell, so a parameter handed to an operation
/// by value still sees the gradients accumulated for it.
#[derive(Clone)]
pub struct Tensor {
    data: ArrayD<f32>,
    grad: GradCell,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
    device: Device,
}

impl Tensor {
    /// Create a new tensor with data on the CPU
    pub fn new(data: ArrayD<f32>, requires_grad: bool) -> Self {
        Self {
            data,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
            device: Device::Cpu,
        }
    }

    /// Create a 1-D tensor from a vector
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from_vec(data).into_dyn(), requires_grad)
    }

    /// Create a tensor of the given shape from row-major values
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>, requires_grad: bool) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
            Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![expected],
            }
        })?;
        Ok(Self::new(array, requires_grad))
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize], requires_grad: bool) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)), requires_grad)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize], requires_grad: bool) -> Self {
        Self::new(ArrayD::ones(IxDyn(shape)), requires_grad)
    }

    /// Create a one-element, non-trainable tensor
    pub fn scalar(value: f32) -> Self {
        Self::from_vec(vec![value], false)
    }

    /// Get reference to data
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Get mutable reference to data
    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    /// Shape of the data
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// First element, for one-element tensors such as loss values
    pub fn item(&self) -> Option<f32> {
        self.data.iter().next().copied()
    }

    /// Get gradient (if computed)
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.grad.borrow().clone()
    }

    /// Set gradient
    pub fn set_grad(&self, grad: ArrayD<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Accumulate gradient (for when tensor is used multiple times)
    pub fn accumulate_grad(&self, grad: ArrayD<f32>) {
        let mut grad_ref = self.grad.borrow_mut();
        if let Some(existing) = grad_ref.as_mut() {
            *existing += &grad;
        } else {
            *grad_ref = Some(grad);
        }
    }

    /// Zero out gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Check if requires gradient
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Get reference to gradient cell (for backward operations)
    pub fn grad_cell(&self) -> GradCell {
        self.grad.clone()
    }

    /// Set backward operation
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// Get backward operation
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Device the tensor is placed on
    pub fn device(&self) -> Device {
        self.device
    }

    /// Copy of this tensor on `device`
    ///
    /// The copy is a graph leaf with its own gradient cell.
    pub fn to(&self, device: Device) -> Tensor {
        Tensor {
            data: self.data.clone(),
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad: self.requires_grad,
            device,
        }
    }

    /// Same values, cut from the graph and excluded from gradient tracking
    pub fn detach(&self) -> Tensor {
        Tensor {
            data: self.data.clone(),
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad: false,
            device: self.device,
        }
    }

    /// New tensor holding `data` on this tensor's device
    pub(crate) fn with_data_on_device(data: ArrayD<f32>, requires_grad: bool, device: Device) -> Tensor {
        let mut tensor = Tensor::new(data, requires_grad);
        tensor.device = device;
        tensor
    }

    /// Get size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.data.shape())
            .field("data", &self.data)
            .field("grad", &self.grad.borrow())
            .field("requires_grad", &self.requires_grad)
            .field("device", &self.device)
            .finish()
    }
}
