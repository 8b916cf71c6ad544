//! Error backpropagation through a convolutional layer
//!
//! Given the layer's forward results, its weights and the errors arriving from
//! downstream, compute the error gradient for every element of the upstream
//! layer's output:
//!
//! ```text
//! up[b, p, r, c] = Σ_f Σ_(kr,kc) w[f, p, kr, kc] · act'(res[b, f, or, oc]) · err[b, f, or, oc]
//! ```
//!
//! summed over the output positions `(or, oc)` whose receptive field contains
//! `(r, c)` at filter offset `(kr, kc)`. This is the exact transpose of the
//! forward convolution with respect to its input. Bias weights do not appear:
//! a bias shifts the output but has no derivative with respect to the input.
//!
//! Variants (index for [`instance_specific`]):
//! - 0 [`BackpropErrorsCpu`]: gather per upstream element, the reference
//! - 1 [`BackpropErrorsScatter`]: scatter from each output position
//! - 2 [`BackpropErrorsGemm`]: `Wᵀ · G` on the device, then col2im

mod cpu;
mod gemm;
mod scatter;

pub use cpu::BackpropErrorsCpu;
pub use gemm::BackpropErrorsGemm;
pub use scatter::BackpropErrorsScatter;

use log::debug;
use std::sync::Arc;

use super::ConvShape;
use crate::device::Device;
use crate::error::{EngineError, EngineResult};
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Work size (input cube x filters x filter area) above which [`instance`]
/// prefers the GEMM formulation on a CPU device.
const GEMM_WORK_THRESHOLD: i64 = 1 << 16;

/// Computes error gradients for the upstream layer.
pub trait BackpropErrors {
    /// Returns a freshly allocated `batch_size x input_cube_size` buffer.
    ///
    /// # Arguments
    ///
    /// * `results` - This layer's forward output (batch_size × output_cube_size)
    /// * `weights` - Filters (num_filters × input_planes × filter_size²)
    /// * `bias_weights` - Checked for length on biased layers, otherwise unused
    /// * `errors` - Loss gradient w.r.t. `results` (batch_size × output_cube_size)
    fn backprop_errors(
        &self,
        batch_size: usize,
        results: &[f32],
        weights: &[f32],
        bias_weights: Option<&[f32]>,
        errors: &[f32],
    ) -> EngineResult<Vec<f32>>;

    fn geometry(&self) -> &LayerGeometry;

    fn name(&self) -> &'static str;
}

/// Fixed enumeration of [`BackpropErrors`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpropErrorsVariant {
    Cpu = 0,
    Scatter = 1,
    Gemm = 2,
}

impl BackpropErrorsVariant {
    pub const ALL: [BackpropErrorsVariant; 3] = [Self::Cpu, Self::Scatter, Self::Gemm];

    pub fn from_index(index: usize) -> EngineResult<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(EngineError::UnknownVariant {
                component: "backprop errors",
                index,
            })
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Picks the variant expected to be fastest for this device and geometry.
pub fn instance(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropErrors>> {
    let work = dim.input_cube_size() as i64
        * dim.num_filters() as i64
        * (dim.filter_size() as i64 * dim.filter_size() as i64);
    let variant = if device.is_accelerated() || work >= GEMM_WORK_THRESHOLD {
        BackpropErrorsVariant::Gemm
    } else {
        BackpropErrorsVariant::Cpu
    };
    debug!(
        "backprop errors: picked {:?} for work {} on {}",
        variant,
        work,
        device.backend()
    );
    build(variant, device, dim, activation)
}

/// The reference implementation, for deterministic comparisons.
pub fn instance_for_test(
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropErrors>> {
    build(BackpropErrorsVariant::Cpu, device, dim, activation)
}

pub fn instance_specific(
    index: usize,
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropErrors>> {
    build(BackpropErrorsVariant::from_index(index)?, device, dim, activation)
}

fn build(
    variant: BackpropErrorsVariant,
    device: &Device,
    dim: &LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
) -> EngineResult<Box<dyn BackpropErrors>> {
    Ok(match variant {
        BackpropErrorsVariant::Cpu => Box::new(BackpropErrorsCpu::new(dim, activation)?),
        BackpropErrorsVariant::Scatter => Box::new(BackpropErrorsScatter::new(dim, activation)?),
        BackpropErrorsVariant::Gemm => {
            Box::new(BackpropErrorsGemm::new(device.clone(), dim, activation)?)
        }
    })
}

/// Length checks shared by every variant.
fn check_args(
    shape: &ConvShape,
    batch_size: usize,
    results: &[f32],
    weights: &[f32],
    bias_weights: Option<&[f32]>,
    errors: &[f32],
) -> EngineResult<()> {
    shape.check_output("results", batch_size, results)?;
    shape.check_output("errors", batch_size, errors)?;
    shape.check_weights(weights)?;
    shape.check_bias(bias_weights)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{LinearActivation, ReluActivation, SimpleRng, TanhActivation};

    fn run_all(
        dim: &LayerGeometry,
        activation: Arc<dyn ActivationFunction>,
        batch_size: usize,
        seed: u64,
    ) -> Vec<Vec<f32>> {
        let mut rng = SimpleRng::new(seed);
        let mut weights = vec![0.0; dim.filters_size() as usize];
        let mut bias = vec![0.0; dim.num_filters() as usize];
        let mut errors = vec![0.0; batch_size * dim.output_cube_size() as usize];
        let mut results = vec![0.0; batch_size * dim.output_cube_size() as usize];
        rng.fill_uniform(&mut weights, -1.0, 1.0);
        rng.fill_uniform(&mut bias, -1.0, 1.0);
        rng.fill_uniform(&mut errors, -1.0, 1.0);
        rng.fill_uniform(&mut results, -1.0, 1.0);

        let device = Device::cpu();
        BackpropErrorsVariant::ALL
            .iter()
            .map(|variant| {
                instance_specific(variant.index(), &device, dim, activation.clone())
                    .unwrap()
                    .backprop_errors(batch_size, &results, &weights, Some(&bias), &errors)
                    .unwrap()
            })
            .collect()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!(
                (x - y).abs() <= 1e-4 * (1.0 + x.abs()),
                "index {}: {} vs {}",
                i,
                x,
                y
            );
        }
    }

    #[test]
    fn test_variants_agree_odd_padded() {
        let dim = LayerGeometry::new(3, 7, 4, 3, true, true);
        let outputs = run_all(&dim, Arc::new(TanhActivation), 2, 11);
        assert_close(&outputs[0], &outputs[1]);
        assert_close(&outputs[0], &outputs[2]);
    }

    #[test]
    fn test_variants_agree_even_padded() {
        let dim = LayerGeometry::new(2, 6, 3, 4, true, false);
        let outputs = run_all(&dim, Arc::new(ReluActivation), 3, 12);
        assert_close(&outputs[0], &outputs[1]);
        assert_close(&outputs[0], &outputs[2]);
    }

    #[test]
    fn test_variants_agree_unpadded() {
        let dim = LayerGeometry::new(2, 8, 5, 3, false, true);
        let outputs = run_all(&dim, Arc::new(LinearActivation), 2, 13);
        assert_close(&outputs[0], &outputs[1]);
        assert_close(&outputs[0], &outputs[2]);
    }

    #[test]
    fn test_single_tap_transposes_weight() {
        // 1x1 filter, linear: upstream = w * error elementwise
        let dim = LayerGeometry::new(1, 2, 1, 1, false, false);
        let backprop =
            instance_for_test(&Device::cpu(), &dim, Arc::new(LinearActivation)).unwrap();
        let up = backprop
            .backprop_errors(1, &[0.0; 4], &[3.0], None, &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        assert_eq!(up, vec![3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let dim = LayerGeometry::new(1, 4, 1, 3, true, false);
        let err = instance_specific(7, &Device::cpu(), &dim, Arc::new(LinearActivation))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownVariant { index: 7, .. }));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dim = LayerGeometry::new(1, 4, 1, 3, true, false);
        for variant in BackpropErrorsVariant::ALL {
            let backprop = instance_specific(
                variant.index(),
                &Device::cpu(),
                &dim,
                Arc::new(LinearActivation),
            )
            .unwrap();
            let err = backprop
                .backprop_errors(1, &[0.0; 16], &[0.0; 9], None, &[0.0; 15])
                .unwrap_err();
            assert!(matches!(err, EngineError::ShapeMismatch { what: "errors", .. }));
        }
    }

    #[test]
    fn test_instance_prefers_gemm_for_large_layers() {
        let small = LayerGeometry::new(1, 5, 1, 3, true, false);
        let large = LayerGeometry::new(32, 28, 32, 5, true, true);
        let device = Device::cpu();
        let act: Arc<dyn ActivationFunction> = Arc::new(ReluActivation);
        assert_eq!(instance(&device, &small, act.clone()).unwrap().name(), "cpu");
        assert_eq!(instance(&device, &large, act).unwrap().name(), "gemm");
    }
}
