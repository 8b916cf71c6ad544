//! Layer trait definition for the layer stack
//!
//! Every layer in a [`NeuralNet`](crate::net::NeuralNet) implements [`Layer`]:
//! forward propagation, backward propagation of errors and gradients, and a
//! parameter update driven by an [`Optimizer`].

use crate::error::EngineResult;
use crate::optimizers::Optimizer;

/// Core trait for layers in the stack.
///
/// Buffers are flat `f32` slices in `[batch, planes, board, board]` order. The
/// caller owns every buffer; layers keep only their parameters and gradient
/// accumulators.
///
/// # Example
///
/// ```ignore
/// let mut output = vec![0.0f32; batch_size * layer.output_size()];
/// layer.forward(&input, &mut output, batch_size)?;
///
/// let mut grad_input = vec![0.0f32; batch_size * layer.input_size()];
/// layer.backward(&input, &output, &grad_output, Some(&mut grad_input), batch_size)?;
/// layer.update_parameters(&mut sgd);
/// ```
pub trait Layer {
    /// Forward propagation through the layer.
    ///
    /// # Arguments
    ///
    /// * `input` - Input data (batch_size × input_size)
    /// * `output` - Output buffer to fill (batch_size × output_size)
    /// * `batch_size` - Number of samples in the batch
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> EngineResult<()>;

    /// Backward propagation through the layer.
    ///
    /// Accumulates parameter gradients internally and, when `grad_input` is
    /// given, writes the loss gradient with respect to `input` into it.
    ///
    /// # Arguments
    ///
    /// * `input` - Input from the matching forward pass
    /// * `output` - Output produced by that forward pass
    /// * `grad_output` - Loss gradient w.r.t. `output`
    /// * `grad_input` - Optional buffer for the upstream error (batch_size × input_size)
    /// * `batch_size` - Number of samples in the batch
    fn backward(
        &self,
        input: &[f32],
        output: &[f32],
        grad_output: &[f32],
        grad_input: Option<&mut [f32]>,
        batch_size: usize,
    ) -> EngineResult<()>;

    /// Applies accumulated gradients through `optimizer`, then clears them.
    fn update_parameters(&mut self, optimizer: &mut dyn Optimizer);

    /// Number of input values per sample.
    fn input_size(&self) -> usize;

    /// Number of output values per sample.
    fn output_size(&self) -> usize;

    fn output_planes(&self) -> usize;

    fn output_board_size(&self) -> usize;

    fn parameter_count(&self) -> usize;

    /// Filter weights; empty for layers without parameters.
    fn weights(&self) -> &[f32] {
        &[]
    }

    fn weights_mut(&mut self) -> &mut [f32] {
        &mut []
    }

    fn bias(&self) -> &[f32] {
        &[]
    }

    fn name(&self) -> &'static str;
}
