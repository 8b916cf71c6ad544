use std::sync::Arc;

use super::{check_args, BackpropErrors};
use crate::conv::{output_gradients, ConvShape};
use crate::error::EngineResult;
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Walks the output positions and scatters each gradient over its receptive
/// field, the same traversal order as the forward pass.
pub struct BackpropErrorsScatter {
    dim: LayerGeometry,
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl BackpropErrorsScatter {
    pub fn new(dim: &LayerGeometry, activation: Arc<dyn ActivationFunction>) -> EngineResult<Self> {
        Ok(Self {
            dim: *dim,
            shape: ConvShape::from_geometry(dim)?,
            activation,
        })
    }
}

impl BackpropErrors for BackpropErrorsScatter {
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
        let input_area = s.board * s.board;
        let mut upstream = vec![0.0f32; batch_size * s.input_cube()];

        for b in 0..batch_size {
            let up_b = &mut upstream[b * s.input_cube()..(b + 1) * s.input_cube()];
            for filter in 0..s.filters {
                let g_base = (b * s.filters + filter) * s.output_area();
                for out_row in 0..s.out_board {
                    for out_col in 0..s.out_board {
                        let g = grads[g_base + out_row * s.out_board + out_col];
                        for plane in 0..s.planes {
                            let up_plane = &mut up_b[plane * input_area..(plane + 1) * input_area];
                            for kr in 0..s.filter_size {
                                let Some(row) = s.input_pos(out_row, kr) else {
                                    continue;
                                };
                                for kc in 0..s.filter_size {
                                    if let Some(col) = s.input_pos(out_col, kc) {
                                        let w = weights[s.weight_index(filter, plane, kr, kc)];
                                        up_plane[row * s.board + col] += w * g;
                                    }
                                }
                            }
                        }
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
        "scatter"
    }
}
