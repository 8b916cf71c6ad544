//! Parameter update rules
//!
//! [`NeuralNet::back_prop`](crate::net::NeuralNet::back_prop) hands each
//! layer an [`Optimizer`] after the whole backward sweep has run.

pub mod sgd;

pub use sgd::SGD;

/// Update rule applied to one parameter buffer at a time.
pub trait Optimizer {
    /// Steps `parameters` against `gradients`, which are summed over the batch.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]);
}
