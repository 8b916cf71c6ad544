//! Layers of the convolutional stack
//!
//! The [`Layer`] trait plus the two layer kinds a [`NeuralNet`](crate::net::NeuralNet)
//! is built from: convolution and max pooling.

mod r#trait;
pub mod conv2d;
pub mod pooling;

pub use conv2d::{ConvolutionalLayer, ConvolutionalMaker};
pub use pooling::PoolingLayer;
pub use r#trait::Layer;
