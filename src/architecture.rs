//! Architecture configuration
//!
//! Describes a layer stack in JSON so nets can be assembled without code
//! changes. Sizes are chained: each layer's input shape is the previous
//! layer's output shape, starting from `planes` x `board_size` x `board_size`.

use serde::Deserialize;
use std::fs;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::layers::ConvolutionalMaker;
use crate::net::NeuralNet;
use crate::utils::activations::{activation_from_name, ACTIVATION_NAMES};

/// One layer of the stack.
///
/// - **convolutional**: requires `num_filters` and `filter_size`; optional
///   `pad_zeros` (default false), `biased` (default true), `activation`
///   (default "tanh")
/// - **pooling**: requires `pooling_size`
///
/// # Examples
///
/// ```json
/// {
///   "layer_type": "convolutional",
///   "num_filters": 32,
///   "filter_size": 5,
///   "pad_zeros": true,
///   "activation": "relu"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    /// "convolutional" or "pooling"
    pub layer_type: String,

    pub num_filters: Option<usize>,
    pub filter_size: Option<usize>,
    pub pad_zeros: Option<bool>,
    pub biased: Option<bool>,
    /// One of [`ACTIVATION_NAMES`]
    pub activation: Option<String>,

    pub pooling_size: Option<usize>,
}

/// The whole stack plus its input shape.
///
/// # Example
///
/// ```json
/// {
///   "planes": 1,
///   "board_size": 28,
///   "seed": 42,
///   "layers": [
///     { "layer_type": "convolutional", "num_filters": 8, "filter_size": 5, "pad_zeros": true },
///     { "layer_type": "pooling", "pooling_size": 2 },
///     { "layer_type": "convolutional", "num_filters": 10, "filter_size": 14, "activation": "linear" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    pub planes: usize,
    pub board_size: usize,
    /// Weight initialisation seed
    pub seed: Option<u64>,
    pub layers: Vec<LayerConfig>,
}

/// Loads and validates an architecture from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use convnet_engine::architecture::load_architecture;
///
/// let arch = load_architecture("config/architectures/small.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture(path: &str) -> EngineResult<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidConfig(message)
}

/// Checks every layer and walks the shape through the stack.
///
/// # Errors
///
/// `InvalidConfig` naming the first offending layer.
pub fn validate_architecture(config: &ArchitectureConfig) -> EngineResult<()> {
    if config.layers.is_empty() {
        return Err(invalid("architecture must have at least one layer".to_string()));
    }
    if config.planes == 0 || config.board_size == 0 {
        return Err(invalid(
            "planes and board_size must be greater than 0".to_string(),
        ));
    }

    let mut board = config.board_size;
    for (i, layer) in config.layers.iter().enumerate() {
        board = validate_layer(layer, i, board)?;
    }
    Ok(())
}

/// Validates one layer against its input board; returns the output board.
fn validate_layer(layer: &LayerConfig, index: usize, board: usize) -> EngineResult<usize> {
    match layer.layer_type.to_lowercase().as_str() {
        "convolutional" => {
            let num_filters = layer.num_filters.ok_or_else(|| {
                invalid(format!("layer {}: convolutional layer requires 'num_filters'", index))
            })?;
            let filter_size = layer.filter_size.ok_or_else(|| {
                invalid(format!("layer {}: convolutional layer requires 'filter_size'", index))
            })?;
            if num_filters == 0 || filter_size == 0 {
                return Err(invalid(format!(
                    "layer {}: num_filters and filter_size must be greater than 0",
                    index
                )));
            }
            if let Some(ref name) = layer.activation {
                if !ACTIVATION_NAMES.contains(&name.to_lowercase().as_str()) {
                    return Err(invalid(format!(
                        "layer {}: invalid activation '{}'. Must be one of: {}",
                        index,
                        name,
                        ACTIVATION_NAMES.join(", ")
                    )));
                }
            }
            if layer.pad_zeros.unwrap_or(false) {
                Ok(if filter_size % 2 == 0 { board + 1 } else { board })
            } else if filter_size > board {
                Err(invalid(format!(
                    "layer {}: unpadded filter {} does not fit board {}",
                    index, filter_size, board
                )))
            } else {
                Ok(board - filter_size + 1)
            }
        }
        "pooling" => {
            let pooling_size = layer.pooling_size.ok_or_else(|| {
                invalid(format!("layer {}: pooling layer requires 'pooling_size'", index))
            })?;
            if pooling_size == 0 || pooling_size > board {
                return Err(invalid(format!(
                    "layer {}: pooling_size {} must be in 1..={}",
                    index, pooling_size, board
                )));
            }
            Ok(board / pooling_size)
        }
        _ => Err(invalid(format!(
            "layer {}: invalid layer type '{}'. Must be one of: convolutional, pooling",
            index, layer.layer_type
        ))),
    }
}

/// Builds a net from a validated architecture.
///
/// # Examples
///
/// ```no_run
/// use convnet_engine::architecture::{build_net, load_architecture};
/// use convnet_engine::config::EngineConfig;
///
/// let arch = load_architecture("config/architectures/small.json").unwrap();
/// let net = build_net(&arch, &EngineConfig::default()).unwrap();
/// assert_eq!(net.num_layers(), arch.layers.len());
/// ```
pub fn build_net(config: &ArchitectureConfig, engine: &EngineConfig) -> EngineResult<NeuralNet> {
    validate_architecture(config)?;
    let device = engine.device()?;
    let mut net = NeuralNet::with_device(config.planes, config.board_size, device, engine.clone());
    if let Some(seed) = config.seed {
        net = net.with_seed(seed);
    }

    for (i, layer) in config.layers.iter().enumerate() {
        match layer.layer_type.to_lowercase().as_str() {
            "convolutional" => {
                let mut maker = ConvolutionalMaker::new()
                    .num_filters(layer.num_filters.unwrap_or(1))
                    .filter_size(layer.filter_size.unwrap_or(1))
                    .pad_zeros(layer.pad_zeros.unwrap_or(false))
                    .biased(layer.biased.unwrap_or(true));
                if let Some(ref name) = layer.activation {
                    maker = maker.activation(activation_from_name(&name.to_lowercase())?);
                }
                net.add_convolutional(maker)?;
            }
            "pooling" => {
                net.add_pooling(layer.pooling_size.unwrap_or(1))?;
            }
            other => {
                return Err(invalid(format!("layer {}: invalid layer type '{}'", i, other)));
            }
        }
    }
    Ok(net)
}
