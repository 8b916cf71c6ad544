use std::sync::Arc;

use super::{check_args, BackpropErrors};
use crate::conv::{col2im_add, output_gradients, ConvShape};
use crate::device::{Device, Gemm};
use crate::error::EngineResult;
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Device variant. Per batch item the unrolled upstream gradient is one matrix
/// product, `col[K x N] = Wᵀ[K x F] · G[F x N]` with K = planes x filter²,
/// N = output area and F = filters; col2im then folds `col` onto the board.
pub struct BackpropErrorsGemm {
    device: Device,
    dim: LayerGeometry,
    shape: ConvShape,
    activation: Arc<dyn ActivationFunction>,
}

impl BackpropErrorsGemm {
    pub fn new(
        device: Device,
        dim: &LayerGeometry,
        activation: Arc<dyn ActivationFunction>,
    ) -> EngineResult<Self> {
        Ok(Self {
            device,
            dim: *dim,
            shape: ConvShape::from_geometry(dim)?,
            activation,
        })
    }
}

impl BackpropErrors for BackpropErrorsGemm {
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

        let patch = s.patch_len();
        let out_area = s.output_area();
        let grads = output_gradients(self.activation.as_ref(), results, errors);

        let weights_buf = self.device.upload(weights);
        let grads_buf = self.device.upload(&grads);
        let mut col_buf = self.device.create_buffer(patch * out_area);
        let mut upstream = vec![0.0f32; batch_size * s.input_cube()];

        for b in 0..batch_size {
            let product = Gemm::new(patch, out_area, s.filters)
                .transpose_a()
                .offsets(0, b * s.output_cube(), 0);
            self.device
                .gemm(&product, &weights_buf, &grads_buf, &mut col_buf)?;
            self.device.finish();
            col2im_add(
                s,
                col_buf.as_slice(),
                &mut upstream[b * s.input_cube()..(b + 1) * s.input_cube()],
            );
        }
        Ok(upstream)
    }

    fn geometry(&self) -> &LayerGeometry {
        &self.dim
    }

    fn name(&self) -> &'static str {
        "gemm"
    }
}
