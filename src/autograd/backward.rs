//! Backward node trait

/// A recorded operation on the gradient tape
///
/// Implementors read the gradient of the tensor they produced, push the
/// input gradients into the input tensors, then recurse into the inputs'
/// own nodes.
pub trait BackwardOp {
    /// Perform backward pass
    fn backward(&self);

    /// Operation name, used in diagnostics
    fn name(&self) -> &'static str {
        "op"
    }
}
