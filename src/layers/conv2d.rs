//! Convolutional layer
//!
//! [`ConvolutionalLayer`] owns filters and bias weights and delegates all
//! arithmetic to the engines in [`crate::conv`], selected once at construction.

use std::cell::RefCell;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::conv::backprop_errors::{self, BackpropErrors};
use crate::conv::backprop_weights::{self, BackpropWeights};
use crate::conv::propagate::{self, Propagate};
use crate::device::Device;
use crate::error::{check_len, EngineResult};
use crate::geometry::LayerGeometry;
use crate::layers::Layer;
use crate::optimizers::Optimizer;
use crate::utils::{
    ActivationFunction, LinearActivation, ReluActivation, ScaledTanhActivation,
    SigmoidActivation, SimpleRng, TanhActivation,
};

/// Builder for a convolutional layer; the stack fills in input planes and
/// board size.
///
/// Defaults: one 1x1 filter, unpadded, biased, tanh.
#[derive(Debug, Clone)]
pub struct ConvolutionalMaker {
    num_filters: usize,
    filter_size: usize,
    pad_zeros: bool,
    biased: bool,
    activation: Arc<dyn ActivationFunction>,
}

impl Default for ConvolutionalMaker {
    fn default() -> Self {
        Self {
            num_filters: 1,
            filter_size: 1,
            pad_zeros: false,
            biased: true,
            activation: Arc::new(TanhActivation),
        }
    }
}

impl ConvolutionalMaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_filters(mut self, num_filters: usize) -> Self {
        self.num_filters = num_filters;
        self
    }

    pub fn filter_size(mut self, filter_size: usize) -> Self {
        self.filter_size = filter_size;
        self
    }

    pub fn pad_zeros(mut self, pad_zeros: bool) -> Self {
        self.pad_zeros = pad_zeros;
        self
    }

    pub fn biased(mut self, biased: bool) -> Self {
        self.biased = biased;
        self
    }

    pub fn activation(mut self, activation: Arc<dyn ActivationFunction>) -> Self {
        self.activation = activation;
        self
    }

    pub fn linear(self) -> Self {
        self.activation(Arc::new(LinearActivation))
    }

    pub fn tanh(self) -> Self {
        self.activation(Arc::new(TanhActivation))
    }

    pub fn scaled_tanh(self) -> Self {
        self.activation(Arc::new(ScaledTanhActivation))
    }

    pub fn sigmoid(self) -> Self {
        self.activation(Arc::new(SigmoidActivation))
    }

    pub fn relu(self) -> Self {
        self.activation(Arc::new(ReluActivation))
    }

    pub fn activation_function(&self) -> Arc<dyn ActivationFunction> {
        self.activation.clone()
    }

    /// Geometry for this maker on top of `input_planes` boards of `input_board_size`.
    pub fn geometry(&self, input_planes: usize, input_board_size: usize) -> LayerGeometry {
        LayerGeometry::new(
            input_planes as i32,
            input_board_size as i32,
            self.num_filters as i32,
            self.filter_size as i32,
            self.pad_zeros,
            self.biased,
        )
    }
}

/// Convolutional layer with learnable filters.
///
/// # Fields
///
/// * `dim` - Layer geometry shared with every engine
/// * `weights` - Filters (num_filters × input_planes × filter_size × filter_size)
/// * `bias` - One bias per filter, empty when unbiased
/// * `grad_weights` / `grad_bias` - Gradient accumulators (interior mutability
///   so `backward` can take `&self`)
pub struct ConvolutionalLayer {
    dim: LayerGeometry,
    activation: Arc<dyn ActivationFunction>,
    weights: Vec<f32>,
    bias: Vec<f32>,
    grad_weights: RefCell<Vec<f32>>,
    grad_bias: RefCell<Vec<f32>>,
    propagate: Box<dyn Propagate>,
    backprop_errors: Box<dyn BackpropErrors>,
    backprop_weights: Box<dyn BackpropWeights>,
}

impl ConvolutionalLayer {
    /// Creates a layer with Xavier-initialised filters and zero bias.
    ///
    /// limit = sqrt(6 / (fan_in + fan_out)), fan_in = planes × filter²,
    /// fan_out = filters × filter².
    pub fn new(
        device: &Device,
        dim: LayerGeometry,
        activation: Arc<dyn ActivationFunction>,
        config: &EngineConfig,
        rng: &mut SimpleRng,
    ) -> EngineResult<Self> {
        dim.validate()?;
        let propagate = match config.propagate_variant {
            Some(index) => propagate::instance_specific(index, device, &dim, activation.clone())?,
            None => propagate::instance(device, &dim, activation.clone())?,
        };
        let backprop_errors = match config.backprop_errors_variant {
            Some(index) => {
                backprop_errors::instance_specific(index, device, &dim, activation.clone())?
            }
            None => backprop_errors::instance(device, &dim, activation.clone())?,
        };
        let backprop_weights = match config.backprop_weights_variant {
            Some(index) => {
                backprop_weights::instance_specific(index, device, &dim, activation.clone())?
            }
            None => backprop_weights::instance(device, &dim, activation.clone())?,
        };

        let area = (dim.filter_size() * dim.filter_size()) as f32;
        let fan_in = dim.input_planes() as f32 * area;
        let fan_out = dim.num_filters() as f32 * area;
        let limit = (6.0f32 / (fan_in + fan_out)).sqrt();

        let weight_count = dim.filters_size() as usize;
        let mut weights = vec![0.0f32; weight_count];
        rng.fill_uniform(&mut weights, -limit, limit);
        let bias_count = if dim.biased() {
            dim.num_filters() as usize
        } else {
            0
        };

        Ok(Self {
            dim,
            activation,
            weights,
            bias: vec![0.0f32; bias_count],
            grad_weights: RefCell::new(vec![0.0f32; weight_count]),
            grad_bias: RefCell::new(vec![0.0f32; bias_count]),
            propagate,
            backprop_errors,
            backprop_weights,
        })
    }

    pub fn geometry(&self) -> &LayerGeometry {
        &self.dim
    }

    pub fn activation(&self) -> &dyn ActivationFunction {
        self.activation.as_ref()
    }

    /// Names of the selected (propagate, backprop errors, backprop weights) variants.
    pub fn engine_names(&self) -> (&'static str, &'static str, &'static str) {
        (
            self.propagate.name(),
            self.backprop_errors.name(),
            self.backprop_weights.name(),
        )
    }

    pub fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    fn bias_arg(&self) -> Option<&[f32]> {
        self.dim.biased().then_some(self.bias.as_slice())
    }
}

impl Layer for ConvolutionalLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> EngineResult<()> {
        check_len("layer output", batch_size * self.output_size(), output.len())?;
        let results = self
            .propagate
            .propagate(batch_size, input, &self.weights, self.bias_arg())?;
        output.copy_from_slice(&results);
        Ok(())
    }

    fn backward(
        &self,
        input: &[f32],
        output: &[f32],
        grad_output: &[f32],
        grad_input: Option<&mut [f32]>,
        batch_size: usize,
    ) -> EngineResult<()> {
        // Upstream errors use the weights as they were during forward.
        if let Some(grad_input) = grad_input {
            check_len("grad input", batch_size * self.input_size(), grad_input.len())?;
            let upstream = self.backprop_errors.backprop_errors(
                batch_size,
                output,
                &self.weights,
                self.bias_arg(),
                grad_output,
            )?;
            grad_input.copy_from_slice(&upstream);
        }

        let grads = self
            .backprop_weights
            .calc_gradients(batch_size, input, output, grad_output)?;
        for (acc, g) in self.grad_weights.borrow_mut().iter_mut().zip(&grads.weights) {
            *acc += g;
        }
        for (acc, g) in self.grad_bias.borrow_mut().iter_mut().zip(&grads.bias) {
            *acc += g;
        }
        Ok(())
    }

    fn update_parameters(&mut self, optimizer: &mut dyn Optimizer) {
        let grad_w = self.grad_weights.get_mut();
        optimizer.update(&mut self.weights, grad_w);
        grad_w.iter_mut().for_each(|g| *g = 0.0);

        let grad_b = self.grad_bias.get_mut();
        if !grad_b.is_empty() {
            optimizer.update(&mut self.bias, grad_b);
            grad_b.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    fn input_size(&self) -> usize {
        self.dim.input_cube_size() as usize
    }

    fn output_size(&self) -> usize {
        self.dim.output_cube_size() as usize
    }

    fn output_planes(&self) -> usize {
        self.dim.num_filters() as usize
    }

    fn output_board_size(&self) -> usize {
        self.dim.output_board_size() as usize
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn weights(&self) -> &[f32] {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    fn bias(&self) -> &[f32] {
        &self.bias
    }

    fn name(&self) -> &'static str {
        "convolutional"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::SGD;

    fn layer(maker: ConvolutionalMaker, planes: usize, board: usize, seed: u64) -> ConvolutionalLayer {
        let mut rng = SimpleRng::new(seed);
        ConvolutionalLayer::new(
            &Device::cpu(),
            maker.geometry(planes, board),
            maker.activation_function(),
            &EngineConfig::default(),
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn test_parameter_count() {
        let layer = layer(ConvolutionalMaker::new().num_filters(8).filter_size(3), 1, 28, 42);
        // 8 * 1 * 3 * 3 weights + 8 biases
        assert_eq!(layer.parameter_count(), 80);
        assert_eq!(layer.output_board_size(), 26);
    }

    #[test]
    fn test_unbiased_has_no_bias() {
        let layer = layer(
            ConvolutionalMaker::new().num_filters(4).filter_size(5).pad_zeros(true).biased(false),
            2,
            9,
            1,
        );
        assert!(layer.bias().is_empty());
        assert_eq!(layer.output_size(), 4 * 81);
    }

    #[test]
    fn test_xavier_initialization_bounds() {
        let layer = layer(ConvolutionalMaker::new().num_filters(8).filter_size(3), 1, 28, 42);
        let limit = (6.0f32 / (9.0 + 72.0)).sqrt();
        for &weight in layer.weights() {
            assert!(weight >= -limit && weight <= limit);
        }
    }

    #[test]
    fn test_deterministic_initialization() {
        let maker = ConvolutionalMaker::new().num_filters(16).filter_size(5);
        let a = layer(maker.clone(), 3, 32, 12345);
        let b = layer(maker, 3, 32, 12345);
        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn test_update_applies_and_clears_gradients() {
        let mut layer = layer(ConvolutionalMaker::new().linear(), 1, 1, 3);
        layer.weights_mut()[0] = 0.5;
        // out = 0.5 * 2, error 1 → dW = 2, dBias = 1
        let mut out = [0.0];
        layer.forward(&[2.0], &mut out, 1).unwrap();
        layer.backward(&[2.0], &out, &[1.0], None, 1).unwrap();

        let mut sgd = SGD::new(0.1);
        layer.update_parameters(&mut sgd);
        assert!((layer.weights()[0] - 0.3).abs() < 1e-6);
        assert!((layer.bias()[0] + 0.1).abs() < 1e-6);

        layer.update_parameters(&mut sgd);
        assert!((layer.weights()[0] - 0.3).abs() < 1e-6);
    }
}
