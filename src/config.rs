//! Engine configuration
//!
//! Selects the compute backend and, optionally, pins each engine to a
//! specific variant instead of letting `instance` pick one.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::conv::backprop_errors::BackpropErrorsVariant;
use crate::conv::backprop_weights::BACKPROP_WEIGHTS_VARIANTS;
use crate::conv::propagate::PROPAGATE_VARIANTS;
use crate::device::{Backend, Device};
use crate::error::{EngineError, EngineResult};
use crate::pooling::POOLING_VARIANTS;

/// Backend and variant overrides for every layer a net builds.
///
/// Omitted fields take their defaults: CPU backend, automatic variant choice.
///
/// # Example
///
/// ```json
/// {
///   "backend": "cpu",
///   "backprop_errors_variant": 2,
///   "pooling_variant": 1
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub backend: Backend,

    /// Forward convolution variant (0 cpu, 1 gemm)
    pub propagate_variant: Option<usize>,

    /// Error backprop variant (0 cpu, 1 scatter, 2 gemm)
    pub backprop_errors_variant: Option<usize>,

    /// Weight gradient variant (0 cpu, 1 gemm)
    pub backprop_weights_variant: Option<usize>,

    /// Max pooling variant (0 cpu, 1 separable)
    pub pooling_variant: Option<usize>,
}

impl EngineConfig {
    /// Opens a device on the configured backend.
    pub fn device(&self) -> EngineResult<Device> {
        Ok(Device::new(self.backend)?)
    }
}

/// Loads an engine configuration from a JSON file and validates it.
///
/// # Examples
///
/// ```no_run
/// use convnet_engine::config::load_config;
///
/// let cfg = load_config("config/engine.json").unwrap();
/// let device = cfg.device().unwrap();
/// ```
pub fn load_config(path: &str) -> EngineResult<EngineConfig> {
    let contents = fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &EngineConfig) -> EngineResult<()> {
    if !config.backend.is_available() {
        return Err(EngineError::InvalidConfig(format!(
            "backend '{}' is not compiled into this build",
            config.backend
        )));
    }

    let limits = [
        ("propagate_variant", config.propagate_variant, PROPAGATE_VARIANTS),
        (
            "backprop_errors_variant",
            config.backprop_errors_variant,
            BackpropErrorsVariant::ALL.len(),
        ),
        (
            "backprop_weights_variant",
            config.backprop_weights_variant,
            BACKPROP_WEIGHTS_VARIANTS,
        ),
        ("pooling_variant", config.pooling_variant, POOLING_VARIANTS),
    ];
    for (field, value, count) in limits {
        if let Some(index) = value {
            if index >= count {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be below {}, got {}",
                    field, count, index
                )));
            }
        }
    }
    Ok(())
}
