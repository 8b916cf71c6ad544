//! Forward propagation through a convolutional layer
//!
//! `out[b, f, or, oc] = act(Σ_(p,kr,kc) w[f, p, kr, kc] · in[b, p, r, c] + bias[f])`
//! with `(r, c)` anchored as described in [`crate::conv`].
//!
//! Variants: 0 [`PropagateCpu`] direct loops, 1 [`PropagateGemm`] im2col and a
//! device matrix product.

use log::debug;
use std::sync::Arc;

use super::{im2col, ConvShape};
use crate::device::{Device, Gemm};
use crate::error::{EngineError, EngineResult};
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

pub trait Propagate {
    /// Returns `batch_size x output_cube_size` activated results.
    fn propagate(
        &self,
        batch_size: usize,
        input: &[f32],
        weights: &[f32],
        bias_weights: Option<&[f32]>,
    ) -> EngineResult<Vec<f32>>;

    fn name(&self) -> &'static str;
}

pub const PROPAGATE_VARIANTS: usize = 2;

pub fn instance(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn Propagate>> {
    let index = if device.is_accelerated() || dim.filter_size() > 1 {
        1
    } else {
        0
    };
    debug!("propagate: picked variant {} for {}", index, dim);
    instance_specific(index, device, dim, activation)
}

pub fn instance_for_test(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn Propagate>> {
    instance_specific(0, device, dim, activation)
}

pub fn instance_specific(
    index: usize,
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn Propagate>> {
    let shape = ConvShape::from_geometry(dim)?;
    match index {
        0 => Ok(Box::new(PropagateCpu { shape, activation })),
        1 => Ok(Box::new(PropagateGemm {
            device: device.clone(),
            shape,
            activation,
        })),
        _ => Err(EngineError::UnknownVariant {
            component: "propagate",
            index,
        }),
    }
}

pub struct PropagateCpu {
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl Propagate for PropagateCpu {
    fn propagate(
        &self,
        batch_size: usize,
        input: &[f32],
        weights: &[f32],
        bias_weights: Option<&[f32]>,
    ) -> EngineResult<Vec<f32>> {
        let s = &self.shape;
        s.check_input(batch_size, input)?;
        s.check_weights(weights)?;
        let bias = s.check_bias(bias_weights)?;

        let input_area = s.board * s.board;
        let mut output = vec![0.0f32; batch_size * s.output_cube()];

        for b in 0..batch_size {
            let in_b = &input[b * s.input_cube()..(b + 1) * s.input_cube()];
            for filter in 0..s.filters {
                let out_base = (b * s.filters + filter) * s.output_area();
                for out_row in 0..s.out_board {
                    for out_col in 0..s.out_board {
                        let mut sum = 0.0f32;
                        for plane in 0..s.planes {
                            let in_plane = &in_b[plane * input_area..(plane + 1) * input_area];
                            for kr in 0..s.filter_size {
                                let Some(row) = s.input_pos(out_row, kr) else {
                                    continue;
                                };
                                for kc in 0..s.filter_size {
                                    if let Some(col) = s.input_pos(out_col, kc) {
                                        sum += weights[s.weight_index(filter, plane, kr, kc)]
                                            * in_plane[row * s.board + col];
                                    }
                                }
                            }
                        }
                        if let Some(bias) = bias {
                            sum += bias[filter];
                        }
                        output[out_base + out_row * s.out_board + out_col] =
                            self.activation.forward(sum);
                    }
                }
            }
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

/// `out_b[F x N] = W[F x K] · im2col(in_b)[K x N]`.
pub struct PropagateGemm {
    device: Device,
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl Propagate for PropagateGemm {
    fn propagate(
        &self,
        batch_size: usize,
        input: &[f32],
        weights: &[f32],
        bias_weights: Option<&[f32]>,
    ) -> EngineResult<Vec<f32>> {
        let s = &self.shape;
        s.check_input(batch_size, input)?;
        s.check_weights(weights)?;
        let bias = s.check_bias(bias_weights)?;

        let patch = s.patch_len();
        let out_area = s.output_area();
        let mut col = vec![0.0f32; patch * out_area];
        let weights_buf = self.device.upload(weights);
        let mut col_buf = self.device.create_buffer(col.len());
        let mut output_buf = self.device.create_buffer(batch_size * s.output_cube());

        for b in 0..batch_size {
            im2col(s, &input[b * s.input_cube()..(b + 1) * s.input_cube()], &mut col);
            col_buf.copy_from_host(&col)?;
            let product = Gemm::new(s.filters, out_area, patch).offsets(0, 0, b * s.output_cube());
            self.device
                .gemm(&product, &weights_buf, &col_buf, &mut output_buf)?;
        }
        self.device.finish();

        let mut output = output_buf.into_host();
        for (i, plane) in output.chunks_exact_mut(out_area).enumerate() {
            if let Some(bias) = bias {
                let shift = bias[i % s.filters];
                plane.iter_mut().for_each(|value| *value += shift);
            }
            self.activation.forward_inplace(plane);
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "gemm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{LinearActivation, ReluActivation, SimpleRng, TanhActivation};

    #[test]
    fn test_box_filter_unpadded() {
        // 2x2 ones filter over a 3x3 board sums each 2x2 window
        let dim = LayerGeometry::new(1, 3, 1, 2, false, true);
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let prop = instance_for_test(&Device::cpu(), &dim, Arc::new(LinearActivation)).unwrap();
        let out = prop.propagate(1, &input, &[1.0; 4], Some(&[0.5])).unwrap();
        assert_eq!(out, vec![12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn test_gemm_applies_bias_before_activation() {
        let dim = LayerGeometry::new(1, 3, 1, 2, false, true);
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let prop = instance_specific(1, &Device::cpu(), &dim, Arc::new(ReluActivation)).unwrap();
        assert_eq!(prop.name(), "gemm");
        let out = prop.propagate(1, &input, &[1.0; 4], Some(&[-13.0])).unwrap();
        assert_eq!(out, vec![0.0, 3.0, 11.0, 15.0]);
    }

    #[test]
    fn test_padded_keeps_board_size() {
        let dim = LayerGeometry::new(1, 3, 1, 3, true, false);
        let prop = instance_for_test(&Device::cpu(), &dim, Arc::new(LinearActivation)).unwrap();
        let out = prop.propagate(1, &[1.0; 9], &[1.0; 9], None).unwrap();
        assert_eq!(out, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_variants_agree() {
        for dim in [
            LayerGeometry::new(3, 7, 4, 3, true, true),
            LayerGeometry::new(2, 6, 3, 4, true, false),
            LayerGeometry::new(2, 8, 5, 5, false, true),
        ] {
            let batch_size = 2;
            let mut rng = SimpleRng::new(5);
            let mut input = vec![0.0; batch_size * dim.input_cube_size() as usize];
            let mut weights = vec![0.0; dim.filters_size() as usize];
            let mut bias = vec![0.0; dim.num_filters() as usize];
            rng.fill_uniform(&mut input, -1.0, 1.0);
            rng.fill_uniform(&mut weights, -0.5, 0.5);
            rng.fill_uniform(&mut bias, -0.5, 0.5);

            let device = Device::cpu();
            let a = instance_specific(0, &device, &dim, Arc::new(TanhActivation))
                .unwrap()
                .propagate(batch_size, &input, &weights, Some(&bias))
                .unwrap();
            let b = instance_specific(1, &device, &dim, Arc::new(TanhActivation))
                .unwrap()
                .propagate(batch_size, &input, &weights, Some(&bias))
                .unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-5, "{} vs {}", x, y);
            }
        }
    }
}
