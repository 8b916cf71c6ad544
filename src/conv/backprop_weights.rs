//! Weight and bias gradients for a convolutional layer
//!
//! With `g = act'(result) · error` at every output position:
//!
//! ```text
//! dW[f, p, kr, kc] = Σ_b Σ_(or,oc) g[b, f, or, oc] · in[b, p, r, c]
//! dBias[f]         = Σ_b Σ_(or,oc) g[b, f, or, oc]
//! ```
//!
//! Gradients are summed over the batch, not averaged, so one SGD step with
//! rate η changes the summed loss by approximately η·|dW|².
//!
//! Variants: 0 [`BackpropWeightsCpu`], 1 [`BackpropWeightsGemm`].

use std::sync::Arc;

use super::{im2col, output_gradients, ConvShape};
use crate::device::{Device, Gemm};
use crate::error::{EngineError, EngineResult};
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Gradients for one layer. `bias` is empty on unbiased layers.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGradients {
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

pub trait BackpropWeights {
    /// # Arguments
    ///
    /// * `input` - The layer's forward input (batch_size × input_cube_size)
    /// * `results` - The layer's forward output (batch_size × output_cube_size)
    /// * `errors` - Loss gradient w.r.t. `results`
    fn calc_gradients(
        &self,
        batch_size: usize,
        input: &[f32],
        results: &[f32],
        errors: &[f32],
    ) -> EngineResult<WeightGradients>;

    fn name(&self) -> &'static str;
}

pub const BACKPROP_WEIGHTS_VARIANTS: usize = 2;

pub fn instance(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropWeights>> {
    let index = if device.is_accelerated() { 1 } else { 0 };
    instance_specific(index, device, dim, activation)
}

pub fn instance_for_test(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropWeights>> {
    instance_specific(0, device, dim, activation)
}

pub fn instance_specific(
    index: usize,
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropWeights>> {
    let shape = ConvShape::from_geometry(dim)?;
    match index {
        0 => Ok(Box::new(BackpropWeightsCpu { shape, activation })),
        1 => Ok(Box::new(BackpropWeightsGemm {
            device: device.clone(),
            shape,
            activation,
        })),
        _ => Err(EngineError::UnknownVariant {
            component: "backprop weights",
            index,
        }),
    }
}

fn check_args(
    s: &ConvShape,
    batch_size: usize,
    input: &[f32],
    results: &[f32],
    errors: &[f32],
) -> EngineResult<()> {
    s.check_input(batch_size, input)?;
    s.check_output("results", batch_size, results)?;
    s.check_output("errors", batch_size, errors)
}

/// Bias gradient: the per-filter sum of output gradients.
fn bias_gradients(s: &ConvShape, batch_size: usize, grads: &[f32]) -> Vec<f32> {
    if !s.biased {
        return Vec::new();
    }
    let mut bias = vec![0.0f32; s.filters];
    for b in 0..batch_size {
        for (filter, slot) in bias.iter_mut().enumerate() {
            let base = (b * s.filters + filter) * s.output_area();
            *slot += grads[base..base + s.output_area()].iter().sum::<f32>();
        }
    }
    bias
}

pub struct BackpropWeightsCpu {
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl BackpropWeights for BackpropWeightsCpu {
    fn calc_gradients(
        &self,
        batch_size: usize,
        input: &[f32],
        results: &[f32],
        errors: &[f32],
    ) -> EngineResult<WeightGradients> {
        let s = &self.shape;
        check_args(s, batch_size, input, results, errors)?;

        let grads = output_gradients(self.activation.as_ref(), results, errors);
        let input_area = s.board * s.board;
        let mut weights = vec![0.0f32; s.weights_len()];

        for b in 0..batch_size {
            let in_b = &input[b * s.input_cube()..(b + 1) * s.input_cube()];
            for filter in 0..s.filters {
                let g_base = (b * s.filters + filter) * s.output_area();
                for out_row in 0..s.out_board {
                    for out_col in 0..s.out_board {
                        let g = grads[g_base + out_row * s.out_board + out_col];
                        for plane in 0..s.planes {
                            let in_plane = &in_b[plane * input_area..(plane + 1) * input_area];
                            for kr in 0..s.filter_size {
                                let Some(row) = s.input_pos(out_row, kr) else {
                                    continue;
                                };
                                for kc in 0..s.filter_size {
                                    if let Some(col) = s.input_pos(out_col, kc) {
                                        weights[s.weight_index(filter, plane, kr, kc)] +=
                                            g * in_plane[row * s.board + col];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(WeightGradients {
            weights,
            bias: bias_gradients(s, batch_size, &grads),
        })
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

/// `dW[F x K] += G_b[F x N] · im2col(in_b)ᵀ[N x K]` for every batch item.
pub struct BackpropWeightsGemm {
    device: Device,
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl BackpropWeights for BackpropWeightsGemm {
    fn calc_gradients(
        &self,
        batch_size: usize,
        input: &[f32],
        results: &[f32],
        errors: &[f32],
    ) -> EngineResult<WeightGradients> {
        let s = &self.shape;
        check_args(s, batch_size, input, results, errors)?;

        let patch = s.patch_len();
        let out_area = s.output_area();
        let grads = output_gradients(self.activation.as_ref(), results, errors);
        let grads_buf = self.device.upload(&grads);
        let mut col = vec![0.0f32; patch * out_area];
        let mut col_buf = self.device.create_buffer(col.len());
        let mut weights_buf = self.device.create_buffer(s.weights_len());

        for b in 0..batch_size {
            im2col(s, &input[b * s.input_cube()..(b + 1) * s.input_cube()], &mut col);
            col_buf.copy_from_host(&col)?;
            let product = Gemm::new(s.filters, patch, out_area)
                .transpose_b()
                .accumulate()
                .offsets(b * s.output_cube(), 0, 0);
            self.device
                .gemm(&product, &grads_buf, &col_buf, &mut weights_buf)?;
        }
        self.device.finish();

        Ok(WeightGradients {
            weights: weights_buf.into_host(),
            bias: bias_gradients(s, batch_size, &grads),
        })
    }

    fn name(&self) -> &'static str {
        "gemm"
    }
}
