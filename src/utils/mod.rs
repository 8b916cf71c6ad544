//! Shared utilities
//!
//! Random number generation for deterministic fills and activation functions
//! used by every convolutional engine.

pub mod activations;
pub mod rng;

pub use activations::{
    activation_from_name, ActivationFunction, LinearActivation, ReluActivation,
    ScaledTanhActivation, SigmoidActivation, TanhActivation,
};
pub use rng::SimpleRng;
