use std::sync::Arc;

use super::{check_args, BackpropErrors};
use crate::conv::{output_gradients, ConvShape};
use crate::error::EngineResult;
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Reference implementation: every upstream element gathers from the output
/// positions that read it. Runs on the calling thread.
pub struct BackpropErrorsCpu {
    dim: LayerGeometry,
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl BackpropErrorsCpu {
    pub fn new(dim: &LayerGeometry, activation: Arc<dyn ActivationFunction>) -> EngineResult<Self> {
        Ok(Self {
            dim: *dim,
            shape: ConvShape::from_geometry(dim)?,
            activation,
        })
    }
}

impl BackpropErrors for BackpropErrorsCpu {
    fn backprop_errors(
        &self,
        batch_size: usize,
        results: &[f32],
        weights: &[f32],
        bias_weights: Option<&[f32]>,
        errors: &[f32],
    ) -> EngineResult<Vec<f32>> {
        let s = &self.shape;
        check_args(s, batch_size, results, weights, bias_weights, errors)?;

        let grads = output_gradients(self.activation.as_ref(), results, errors);
        let out_area = s.output_area();
        let input_area = s.board * s.board;
        let mut upstream = vec![0.0f32; batch_size * s.input_cube()];

        for b in 0..batch_size {
            let grads_b = &grads[b * s.output_cube()..(b + 1) * s.output_cube()];
            for plane in 0..s.planes {
                let up_base = (b * s.planes + plane) * input_area;
                for row in 0..s.board {
                    for col in 0..s.board {
                        let mut sum = 0.0f32;
                        for filter in 0..s.filters {
                            let grads_f = &grads_b[filter * out_area..(filter + 1) * out_area];
                            for kr in 0..s.filter_size {
                                let Some(out_row) = s.output_pos(row, kr) else {
                                    continue;
                                };
                                for kc in 0..s.filter_size {
                                    let Some(out_col) = s.output_pos(col, kc) else {
                                        continue;
                                    };
                                    let w = weights[s.weight_index(filter, plane, kr, kc)];
                                    sum += w * grads_f[out_row * s.out_board + out_col];
                                }
                            }
                        }
                        upstream[up_base + row * s.board + col] = sum;
                    }
                }
            }
        }
        Ok(upstream)
    }

    fn geometry(&self) -> &LayerGeometry {
        &self.dim
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
