//! Layer stack
//!
//! [`NeuralNet`] chains convolutional and pooling layers over a fixed input
//! shape, keeps every intermediate activation of the last forward pass, and
//! trains with plain SGD on the squared-error loss
//! `0.5 * Σ (output - expected)²`.

use log::{debug, trace};

use crate::config::EngineConfig;
use crate::device::Device;
use crate::error::{check_len, EngineError, EngineResult};
use crate::layers::{ConvolutionalLayer, ConvolutionalMaker, Layer, PoolingLayer};
use crate::optimizers::SGD;
use crate::utils::SimpleRng;

const DEFAULT_SEED: u64 = 42;

pub struct NeuralNet {
    device: Device,
    config: EngineConfig,
    rng: SimpleRng,
    input_planes: usize,
    input_board_size: usize,
    batch_size: usize,
    layers: Vec<Box<dyn Layer>>,
    input: Vec<f32>,
    activations: Vec<Vec<f32>>,
}

impl NeuralNet {
    /// Empty stack on a CPU device with default engine selection.
    pub fn new(input_planes: usize, input_board_size: usize) -> Self {
        Self::with_device(
            input_planes,
            input_board_size,
            Device::cpu(),
            EngineConfig::default(),
        )
    }

    pub fn with_device(
        input_planes: usize,
        input_board_size: usize,
        device: Device,
        config: EngineConfig,
    ) -> Self {
        Self {
            device,
            config,
            rng: SimpleRng::new(DEFAULT_SEED),
            input_planes,
            input_board_size,
            batch_size: 1,
            layers: Vec::new(),
            input: Vec::new(),
            activations: Vec::new(),
        }
    }

    /// Reseeds weight initialisation for layers added after this call.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SimpleRng::new(seed);
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size;
        self.activations.clear();
        self
    }

    /// Planes produced by the last layer (the input planes for an empty stack).
    pub fn output_planes(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_planes, |layer| layer.output_planes())
    }

    pub fn output_board_size(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_board_size, |layer| layer.output_board_size())
    }

    pub fn input_size(&self) -> usize {
        self.input_planes * self.input_board_size * self.input_board_size
    }

    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .map_or(self.input_size(), |layer| layer.output_size())
    }

    pub fn add_convolutional(&mut self, maker: ConvolutionalMaker) -> EngineResult<&mut Self> {
        let dim = maker.geometry(self.output_planes(), self.output_board_size());
        let activation = maker.activation_function();
        let layer =
            ConvolutionalLayer::new(&self.device, dim, activation, &self.config, &mut self.rng)?;
        debug!(
            "layer {}: convolutional {} engines {:?}",
            self.layers.len(),
            dim,
            layer.engine_names()
        );
        self.layers.push(Box::new(layer));
        self.activations.clear();
        Ok(self)
    }

    pub fn add_pooling(&mut self, pooling_size: usize) -> EngineResult<&mut Self> {
        let layer = PoolingLayer::new(
            &self.device,
            self.output_planes(),
            self.output_board_size(),
            pooling_size,
            self.config.pooling_variant,
        )?;
        debug!("layer {}: pooling {}", self.layers.len(), layer.shape());
        self.layers.push(Box::new(layer));
        self.activations.clear();
        Ok(self)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.layers.iter().map(|layer| layer.as_ref())
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|layer| layer.as_ref())
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|layer| layer.as_mut())
    }

    /// Runs `input` (`batch_size x input_size`) through every layer.
    pub fn propagate(&mut self, input: &[f32]) -> EngineResult<&[f32]> {
        if self.layers.is_empty() {
            return Err(EngineError::InvalidConfig("net has no layers".to_string()));
        }
        check_len("net input", self.batch_size * self.input_size(), input.len())?;
        self.input.clear();
        self.input.extend_from_slice(input);

        let mut activations: Vec<Vec<f32>> = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let prev: &[f32] = if i == 0 { &self.input } else { &activations[i - 1] };
            let mut out = vec![0.0f32; self.batch_size * layer.output_size()];
            layer.forward(prev, &mut out, self.batch_size)?;
            activations.push(out);
        }
        self.activations = activations;
        trace!("propagated batch of {}", self.batch_size);
        Ok(self.results())
    }

    /// Output of the last `propagate`; empty before the first one.
    pub fn results(&self) -> &[f32] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// `0.5 * Σ (results - expected)²` over the whole batch.
    pub fn calc_loss(&self, expected: &[f32]) -> EngineResult<f32> {
        let results = self.results();
        check_len("expected output", results.len(), expected.len())?;
        if results.is_empty() {
            return Err(EngineError::InvalidConfig(
                "calc_loss called before propagate".to_string(),
            ));
        }
        Ok(0.5
            * results
                .iter()
                .zip(expected)
                .map(|(out, exp)| (out - exp) * (out - exp))
                .sum::<f32>())
    }

    /// One SGD step against `expected` for the last propagated batch.
    ///
    /// Every layer's upstream errors are computed from the weights used in the
    /// forward pass; parameters change only after the whole backward sweep.
    pub fn back_prop(&mut self, learning_rate: f32, expected: &[f32]) -> EngineResult<()> {
        if self.activations.len() != self.layers.len() || self.layers.is_empty() {
            return Err(EngineError::InvalidConfig(
                "back_prop called before propagate".to_string(),
            ));
        }
        let results = self.results();
        check_len("expected output", results.len(), expected.len())?;
        let mut errors: Vec<f32> = results.iter().zip(expected).map(|(o, e)| o - e).collect();

        for i in (0..self.layers.len()).rev() {
            let layer = &self.layers[i];
            let input: &[f32] = if i == 0 { &self.input } else { &self.activations[i - 1] };
            let output = &self.activations[i];
            if i == 0 {
                layer.backward(input, output, &errors, None, self.batch_size)?;
            } else {
                let mut upstream = vec![0.0f32; self.batch_size * layer.input_size()];
                layer.backward(input, output, &errors, Some(&mut upstream), self.batch_size)?;
                errors = upstream;
            }
        }

        let mut sgd = SGD::new(learning_rate);
        for layer in self.layers.iter_mut() {
            layer.update_parameters(&mut sgd);
        }
        Ok(())
    }
}
