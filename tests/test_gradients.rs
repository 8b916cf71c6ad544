// Integration tests for weight gradients, upstream errors and forward
// propagation: every variant agrees, and the analytic gradients match
// central finite differences of the squared-error loss.

use approx::assert_relative_eq;
use std::sync::Arc;

use convnet_engine::conv::backprop_errors::{self, BackpropErrorsVariant};
use convnet_engine::conv::backprop_weights::{self, BACKPROP_WEIGHTS_VARIANTS};
use convnet_engine::conv::propagate::{self, PROPAGATE_VARIANTS};
use convnet_engine::utils::{ActivationFunction, SimpleRng, TanhActivation};
use convnet_engine::{Device, LayerGeometry};

const BATCH: usize = 2;
const STEP: f32 = 1e-2;

struct Case {
    dim: LayerGeometry,
    input: Vec<f32>,
    weights: Vec<f32>,
    bias: Vec<f32>,
    expected: Vec<f32>,
}

fn case(dim: LayerGeometry, seed: u64) -> Case {
    let mut rng = SimpleRng::new(seed);
    let mut c = Case {
        dim,
        input: vec![0.0; BATCH * dim.input_cube_size() as usize],
        weights: vec![0.0; dim.filters_size() as usize],
        bias: vec![0.0; dim.num_filters() as usize],
        expected: vec![0.0; BATCH * dim.output_cube_size() as usize],
    };
    rng.fill_uniform(&mut c.input, -1.0, 1.0);
    rng.fill_uniform(&mut c.weights, -0.5, 0.5);
    rng.fill_uniform(&mut c.bias, -0.5, 0.5);
    rng.fill_uniform(&mut c.expected, -1.0, 1.0);
    c
}

fn activation() -> Arc<dyn ActivationFunction> {
    Arc::new(TanhActivation)
}

fn forward(c: &Case, input: &[f32], weights: &[f32], bias: &[f32]) -> Vec<f32> {
    propagate::instance_for_test(&Device::cpu(), &c.dim, activation())
        .unwrap()
        .propagate(BATCH, input, weights, c.dim.biased().then_some(bias))
        .unwrap()
}

fn loss(c: &Case, input: &[f32], weights: &[f32], bias: &[f32]) -> f64 {
    forward(c, input, weights, bias)
        .iter()
        .zip(&c.expected)
        .map(|(&o, &e)| 0.5 * ((o - e) as f64).powi(2))
        .sum()
}

fn central_difference(c: &Case, which: usize, index: usize) -> f32 {
    let mut input = c.input.clone();
    let mut weights = c.weights.clone();
    let mut bias = c.bias.clone();
    let target = match which {
        0 => &mut input[index],
        1 => &mut weights[index],
        _ => &mut bias[index],
    };
    let original = *target;
    *target = original + STEP;
    let plus = loss(c, &input, &weights, &bias);
    let target = match which {
        0 => &mut input[index],
        1 => &mut weights[index],
        _ => &mut bias[index],
    };
    *target = original - STEP;
    let minus = loss(c, &input, &weights, &bias);
    ((plus - minus) / (2.0 * STEP as f64)) as f32
}

fn errors(c: &Case, results: &[f32]) -> Vec<f32> {
    results.iter().zip(&c.expected).map(|(o, e)| o - e).collect()
}

fn geometries() -> Vec<LayerGeometry> {
    vec![
        LayerGeometry::new(2, 5, 3, 3, true, true),
        LayerGeometry::new(2, 4, 2, 2, true, false),
        LayerGeometry::new(1, 6, 2, 3, false, true),
    ]
}

#[test]
fn test_weight_gradients_match_finite_differences() {
    let _ = env_logger::builder().is_test(true).try_init();
    for (n, dim) in geometries().into_iter().enumerate() {
        let c = case(dim, 100 + n as u64);
        let results = forward(&c, &c.input, &c.weights, &c.bias);
        let errs = errors(&c, &results);

        for index in 0..BACKPROP_WEIGHTS_VARIANTS {
            let grads = backprop_weights::instance_specific(index, &Device::cpu(), &dim, activation())
                .unwrap()
                .calc_gradients(BATCH, &c.input, &results, &errs)
                .unwrap();
            for (i, &g) in grads.weights.iter().enumerate() {
                let numeric = central_difference(&c, 1, i);
                assert_relative_eq!(g, numeric, epsilon = 2e-3, max_relative = 1e-2);
            }
            assert_eq!(grads.bias.len(), if dim.biased() { dim.num_filters() as usize } else { 0 });
            for (i, &g) in grads.bias.iter().enumerate() {
                let numeric = central_difference(&c, 2, i);
                assert_relative_eq!(g, numeric, epsilon = 2e-3, max_relative = 1e-2);
            }
        }
    }
}

#[test]
fn test_upstream_errors_match_finite_differences() {
    for (n, dim) in geometries().into_iter().enumerate() {
        let c = case(dim, 200 + n as u64);
        let results = forward(&c, &c.input, &c.weights, &c.bias);
        let errs = errors(&c, &results);

        for variant in BackpropErrorsVariant::ALL {
            let upstream = backprop_errors::instance_specific(
                variant.index(),
                &Device::cpu(),
                &dim,
                activation(),
            )
            .unwrap()
            .backprop_errors(BATCH, &results, &c.weights, dim.biased().then_some(&c.bias[..]), &errs)
            .unwrap();
            for (i, &u) in upstream.iter().enumerate() {
                let numeric = central_difference(&c, 0, i);
                assert_relative_eq!(u, numeric, epsilon = 2e-3, max_relative = 1e-2);
            }
        }
    }
}

#[test]
fn test_propagate_variants_agree() {
    let dim = LayerGeometry::new(4, 11, 6, 5, true, true);
    let c = case(dim, 7);
    let reference = forward(&c, &c.input, &c.weights, &c.bias);
    for index in 0..PROPAGATE_VARIANTS {
        let out = propagate::instance_specific(index, &Device::cpu(), &dim, activation())
            .unwrap()
            .propagate(BATCH, &c.input, &c.weights, Some(&c.bias))
            .unwrap();
        for (a, b) in out.iter().zip(&reference) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5, max_relative = 1e-4);
        }
    }
}

#[test]
fn test_best_available_device_matches_cpu() {
    let dim = LayerGeometry::new(3, 8, 4, 3, true, true);
    let c = case(dim, 9);
    let reference = forward(&c, &c.input, &c.weights, &c.bias);
    let out = propagate::instance(&Device::best_available(), &dim, activation())
        .unwrap()
        .propagate(BATCH, &c.input, &c.weights, Some(&c.bias))
        .unwrap();
    for (a, b) in out.iter().zip(&reference) {
        assert_relative_eq!(*a, *b, epsilon = 1e-5, max_relative = 1e-4);
    }
}
