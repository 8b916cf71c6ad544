//! Convolutional network engine
//!
//! Propagation and backpropagation engines for 2-D convolutional layers over
//! square boards, max pooling, and a small layer stack trained with SGD.
//!
//! Every engine is a strategy trait with interchangeable variants built by
//! factory functions: `instance` picks a variant for the device and geometry,
//! `instance_for_test` returns the reference loops, and `instance_specific`
//! selects by index. All variants of one engine must produce the same results.
//!
//! # Modules
//!
//! - `geometry`: `LayerGeometry`, the derived sizes every engine shares
//! - `device`: compute device, buffers and the matrix-product kernel
//! - `conv`: forward propagation, error backpropagation and weight gradients
//! - `pooling`: max pooling forward and backward
//! - `layers`: `Layer` trait, convolutional and pooling layers
//! - `net`: `NeuralNet` layer stack and loss
//! - `optimizers`: parameter update rules
//! - `utils`: activations and the seeded RNG
//! - `config` / `architecture`: JSON engine and architecture configuration

pub mod architecture;
pub mod config;
pub mod conv;
pub mod device;
pub mod error;
pub mod geometry;
pub mod layers;
pub mod net;
pub mod optimizers;
pub mod pooling;
pub mod utils;

pub use device::{Backend, Device, DeviceBuffer};
pub use error::{DeviceError, EngineError, EngineResult};
pub use geometry::LayerGeometry;
pub use layers::{ConvolutionalMaker, Layer};
pub use net::NeuralNet;
