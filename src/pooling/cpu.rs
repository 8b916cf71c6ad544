use super::{PoolingPropagate, PoolingShape};
use crate::device::{Device, DeviceBuffer};
use crate::error::EngineResult;

/// Reference max pooling: one pass over each window, first maximum wins.
pub struct PoolingPropagateCpu {
    device: Device,
    shape: PoolingShape,
}

impl PoolingPropagateCpu {
    pub fn new(device: Device, shape: PoolingShape) -> Self {
        Self { device, shape }
    }
}

/// Pools one batch of planes from `input` into `output`.
pub(crate) fn max_pool(shape: &PoolingShape, batch_size: usize, input: &[f32], output: &mut [f32]) {
    let board = shape.input_board_size();
    let pool = shape.pooling_size();
    let out_board = shape.output_board_size();

    for plane in 0..batch_size * shape.num_planes() {
        let in_base = plane * board * board;
        let out_base = plane * out_board * out_board;
        for out_row in 0..out_board {
            for out_col in 0..out_board {
                let mut best = f32::NEG_INFINITY;
                for dy in 0..pool {
                    let row = in_base + (out_row * pool + dy) * board + out_col * pool;
                    for &v in &input[row..row + pool] {
                        if v > best {
                            best = v;
                        }
                    }
                }
                output[out_base + out_row * out_board + out_col] = best;
            }
        }
    }
}

impl PoolingPropagate for PoolingPropagateCpu {
    fn propagate_buffers(
        &self,
        batch_size: usize,
        input: &DeviceBuffer,
        output: &mut DeviceBuffer,
    ) -> EngineResult<()> {
        self.shape.check_input(batch_size, input.len())?;
        self.shape.check_output(batch_size, output.len())?;
        max_pool(&self.shape, batch_size, input.as_slice(), output.as_mut_slice());
        self.device.finish();
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn shape(&self) -> &PoolingShape {
        &self.shape
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
