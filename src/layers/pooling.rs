//! Max pooling layer

use crate::device::Device;
use crate::error::{check_len, EngineResult};
use crate::layers::Layer;
use crate::optimizers::Optimizer;
use crate::pooling::{self, PoolingBackprop, PoolingPropagate, PoolingShape};

/// Parameter-free layer wrapping a pooling engine and its backward pass.
///
/// Selectors are recomputed from the forward input during `backward`, so the
/// layer holds no per-batch state.
pub struct PoolingLayer {
    engine: Box<dyn PoolingPropagate>,
    backprop: PoolingBackprop,
}

impl PoolingLayer {
    pub fn new(
        device: &Device,
        num_planes: usize,
        input_board_size: usize,
        pooling_size: usize,
        variant: Option<usize>,
    ) -> EngineResult<Self> {
        let engine = match variant {
            Some(index) => pooling::instance_specific(
                index,
                device,
                num_planes,
                input_board_size,
                pooling_size,
            )?,
            None => pooling::instance(device, num_planes, input_board_size, pooling_size)?,
        };
        let backprop = PoolingBackprop::new(*engine.shape());
        Ok(Self { engine, backprop })
    }

    pub fn shape(&self) -> &PoolingShape {
        self.engine.shape()
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }
}

impl Layer for PoolingLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> EngineResult<()> {
        check_len("layer output", batch_size * self.output_size(), output.len())?;
        let pooled = self.engine.propagate(batch_size, input)?;
        output.copy_from_slice(&pooled);
        Ok(())
    }

    fn backward(
        &self,
        input: &[f32],
        _output: &[f32],
        grad_output: &[f32],
        grad_input: Option<&mut [f32]>,
        batch_size: usize,
    ) -> EngineResult<()> {
        let Some(grad_input) = grad_input else {
            return Ok(());
        };
        check_len("grad input", batch_size * self.input_size(), grad_input.len())?;
        let selectors = self.backprop.selectors(batch_size, input)?;
        let upstream = self
            .backprop
            .backprop_errors(batch_size, grad_output, &selectors)?;
        grad_input.copy_from_slice(&upstream);
        Ok(())
    }

    fn update_parameters(&mut self, _optimizer: &mut dyn Optimizer) {}

    fn input_size(&self) -> usize {
        self.shape().input_cube_size()
    }

    fn output_size(&self) -> usize {
        self.shape().output_cube_size()
    }

    fn output_planes(&self) -> usize {
        self.shape().num_planes()
    }

    fn output_board_size(&self) -> usize {
        self.shape().output_board_size()
    }

    fn parameter_count(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "pooling"
    }
}
