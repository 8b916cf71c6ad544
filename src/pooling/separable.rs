use super::{PoolingPropagate, PoolingShape};
use crate::device::{Device, DeviceBuffer};
use crate::error::EngineResult;

/// Two-pass max pooling on device buffers.
///
/// Pass one reduces each used input row across the window width into a
/// `rows x out_board` scratch buffer; pass two reduces the scratch buffer
/// across the window height. Max is exact, so the result is identical to the
/// single-pass kernel.
pub struct PoolingPropagateSeparable {
    device: Device,
    shape: PoolingShape,
}

impl PoolingPropagateSeparable {
    pub fn new(device: Device, shape: PoolingShape) -> Self {
        Self { device, shape }
    }
}

impl PoolingPropagate for PoolingPropagateSeparable {
    fn propagate_buffers(
        &self,
        batch_size: usize,
        input: &DeviceBuffer,
        output: &mut DeviceBuffer,
    ) -> EngineResult<()> {
        let s = &self.shape;
        s.check_input(batch_size, input.len())?;
        s.check_output(batch_size, output.len())?;

        let board = s.input_board_size();
        let pool = s.pooling_size();
        let out_board = s.output_board_size();
        let used_rows = out_board * pool;
        let planes = batch_size * s.num_planes();

        let mut scratch = self.device.create_buffer(planes * used_rows * out_board);
        {
            let input = input.as_slice();
            let scratch = scratch.as_mut_slice();
            for plane in 0..planes {
                for row in 0..used_rows {
                    let in_row = &input[(plane * board + row) * board..][..out_board * pool];
                    let dst = &mut scratch[(plane * used_rows + row) * out_board..][..out_board];
                    for (slot, window) in dst.iter_mut().zip(in_row.chunks_exact(pool)) {
                        let mut best = f32::NEG_INFINITY;
                        for &v in window {
                            if v > best {
                                best = v;
                            }
                        }
                        *slot = best;
                    }
                }
            }
        }

        let scratch = scratch.as_slice();
        let output = output.as_mut_slice();
        for plane in 0..planes {
            for out_row in 0..out_board {
                let dst = &mut output[(plane * out_board + out_row) * out_board..][..out_board];
                dst.iter_mut().for_each(|v| *v = f32::NEG_INFINITY);
                for dy in 0..pool {
                    let src_row = plane * used_rows + out_row * pool + dy;
                    let src = &scratch[src_row * out_board..][..out_board];
                    for (slot, &v) in dst.iter_mut().zip(src) {
                        if v > *slot {
                            *slot = v;
                        }
                    }
                }
            }
        }
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
        "separable"
    }
}
