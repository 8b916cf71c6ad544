//! Error types shared by the engines, the device layer and configuration loading.

use thiserror::Error;

/// Failures raised by the compute device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The requested backend was not compiled into this build.
    #[error("backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),

    /// A host/device copy or kernel argument did not match the buffer it targets.
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// A kernel was enqueued with arguments it cannot execute.
    #[error("kernel '{kernel}' rejected: {reason}")]
    Dispatch { kernel: &'static str, reason: String },
}

/// Errors surfaced by the propagation and backpropagation engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A caller-supplied buffer does not match the layer geometry.
    #[error("{what}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Geometry that no kernel can run on (zero or negative sizes).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A pooling selector that points outside its window.
    #[error("selector {selector} at {index} is outside a {pooling_size}x{pooling_size} window")]
    InvalidSelector {
        index: usize,
        selector: u32,
        pooling_size: usize,
    },

    /// `instance_specific` was asked for an index outside the variant table.
    #[error("unknown {component} variant {index}")]
    UnknownVariant {
        component: &'static str,
        index: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Checks a buffer length against the size the geometry demands.
pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> EngineResult<()> {
    if expected != actual {
        return Err(EngineError::ShapeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
