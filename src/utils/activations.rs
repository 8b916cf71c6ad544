//! Activation functions for convolutional layers
//!
//! Each activation supplies its forward value and its derivative expressed in
//! terms of the *output* value. Layers only keep their post-activation results,
//! so backpropagation scales errors by `derivative(result)` without ever
//! recomputing the pre-activation sums.
//!
//! - Linear: f(x) = x
//! - Tanh: f(x) = tanh(x)
//! - ScaledTanh: f(x) = 1.7159 tanh(0.66667 x)
//! - Sigmoid: f(x) = 1 / (1 + exp(-x))
//! - ReLU: f(x) = max(0, x)

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Stateless activation strategy shared between the engines of a layer.
pub trait ActivationFunction: Debug + Send + Sync {
    /// Activated value for a pre-activation sum.
    fn forward(&self, x: f32) -> f32;

    /// Local slope, given the already-activated output `y = forward(x)`.
    fn derivative(&self, output: f32) -> f32;

    fn name(&self) -> &'static str;

    /// Applies `forward` to every element in place.
    fn forward_inplace(&self, data: &mut [f32]) {
        for value in data.iter_mut() {
            *value = self.forward(*value);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearActivation;

impl ActivationFunction for LinearActivation {
    fn forward(&self, x: f32) -> f32 {
        x
    }

    fn derivative(&self, _output: f32) -> f32 {
        1.0
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

/// Tanh activation: f'(x) = 1 - f(x)².
#[derive(Debug, Clone, Copy, Default)]
pub struct TanhActivation;

impl ActivationFunction for TanhActivation {
    fn forward(&self, x: f32) -> f32 {
        x.tanh()
    }

    fn derivative(&self, output: f32) -> f32 {
        1.0 - output * output
    }

    fn name(&self) -> &'static str {
        "tanh"
    }
}

/// LeCun's scaled tanh, 1.7159 tanh(2x/3).
///
/// With y = A tanh(Bx): dy/dx = B (A - y² / A).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledTanhActivation;

const SCALED_TANH_A: f32 = 1.7159;
const SCALED_TANH_B: f32 = 0.66667;

impl ActivationFunction for ScaledTanhActivation {
    fn forward(&self, x: f32) -> f32 {
        SCALED_TANH_A * (SCALED_TANH_B * x).tanh()
    }

    fn derivative(&self, output: f32) -> f32 {
        SCALED_TANH_B * (SCALED_TANH_A - output * output / SCALED_TANH_A)
    }

    fn name(&self) -> &'static str {
        "scaledtanh"
    }
}

/// Sigmoid activation: f'(x) = f(x)(1 - f(x)).
#[derive(Debug, Clone, Copy, Default)]
pub struct SigmoidActivation;

impl ActivationFunction for SigmoidActivation {
    fn forward(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    fn derivative(&self, output: f32) -> f32 {
        output * (1.0 - output)
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }
}

/// ReLU activation. The slope at exactly zero is taken as 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReluActivation;

impl ActivationFunction for ReluActivation {
    fn forward(&self, x: f32) -> f32 {
        if x > 0.0 {
            x
        } else {
            0.0
        }
    }

    fn derivative(&self, output: f32) -> f32 {
        if output > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn name(&self) -> &'static str {
        "relu"
    }
}

/// Names accepted by [`activation_from_name`].
pub const ACTIVATION_NAMES: [&str; 5] = ["linear", "tanh", "scaledtanh", "sigmoid", "relu"];

/// Looks up an activation by its config-file name.
///
/// # Example
///
/// ```
/// use convnet_engine::utils::activations::activation_from_name;
///
/// let tanh = activation_from_name("tanh").unwrap();
/// assert_eq!(tanh.derivative(0.0), 1.0);
/// assert!(activation_from_name("softplus").is_err());
/// ```
pub fn activation_from_name(name: &str) -> EngineResult<Arc<dyn ActivationFunction>> {
    let activation: Arc<dyn ActivationFunction> = match name {
        "linear" => Arc::new(LinearActivation),
        "tanh" => Arc::new(TanhActivation),
        "scaledtanh" => Arc::new(ScaledTanhActivation),
        "sigmoid" => Arc::new(SigmoidActivation),
        "relu" => Arc::new(ReluActivation),
        other => {
            return Err(EngineError::InvalidConfig(format!(
                "Invalid activation function '{}'. Must be one of: {}",
                other,
                ACTIVATION_NAMES.join(", ")
            )))
        }
    };
    Ok(activation)
}
