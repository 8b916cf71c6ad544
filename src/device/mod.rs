//! Compute device abstraction
//!
//! The engines talk to a [`Device`] the way they would talk to an accelerator:
//! allocate [`DeviceBuffer`]s, copy host data in, enqueue named kernels, copy
//! results back out, and call [`Device::finish`] before handing results to the
//! caller. Dispatch is synchronous, so `finish` is a completion fence that
//! never has outstanding work in the current backends.
//!
//! Backends:
//! - `Cpu`: portable Rust kernels, always available
//! - `Blas`: `sgemm` routed through cblas (requires the `blas` feature)

pub mod gemm;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DeviceError;
pub use gemm::Gemm;

const KERNEL_SGEMM: &str = "sgemm";

/// Kernel provider backing a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Blas,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Blas => "blas",
        }
    }

    /// Whether this build can construct a device on this backend.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Cpu => true,
            Backend::Blas => cfg!(feature = "blas"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to a compute device. Cheap to clone; holds no buffers itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    backend: Backend,
}

impl Device {
    pub fn new(backend: Backend) -> Result<Self, DeviceError> {
        if !backend.is_available() {
            return Err(DeviceError::BackendUnavailable(backend.name()));
        }
        debug!("created {} device", backend);
        Ok(Self { backend })
    }

    pub fn cpu() -> Self {
        Self {
            backend: Backend::Cpu,
        }
    }

    /// BLAS when compiled in, CPU otherwise.
    pub fn best_available() -> Self {
        if Backend::Blas.is_available() {
            Self {
                backend: Backend::Blas,
            }
        } else {
            Self::cpu()
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_accelerated(&self) -> bool {
        self.backend != Backend::Cpu
    }

    /// Allocates a zero-filled buffer of `len` elements.
    pub fn create_buffer(&self, len: usize) -> DeviceBuffer {
        DeviceBuffer {
            data: vec![0.0; len],
        }
    }

    /// Allocates a buffer and copies `host` into it.
    pub fn upload(&self, host: &[f32]) -> DeviceBuffer {
        trace!("upload {} floats", host.len());
        DeviceBuffer {
            data: host.to_vec(),
        }
    }

    /// Enqueues `C = alpha * op(A) * op(B) + beta * C`.
    pub fn gemm(
        &self,
        g: &Gemm,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &mut DeviceBuffer,
    ) -> Result<(), DeviceError> {
        if g.m == 0 || g.n == 0 || g.k == 0 {
            return Err(DeviceError::Dispatch {
                kernel: KERNEL_SGEMM,
                reason: format!("empty problem m={} n={} k={}", g.m, g.n, g.k),
            });
        }
        let (a_len, b_len, c_len) = g.extents();
        check_extent(g.a_offset + a_len, a.len())?;
        check_extent(g.b_offset + b_len, b.len())?;
        check_extent(g.c_offset + c_len, c.len())?;

        trace!(
            "enqueue {} on {}: m={} n={} k={} ta={} tb={}",
            KERNEL_SGEMM,
            self.backend,
            g.m,
            g.n,
            g.k,
            g.transpose_a,
            g.transpose_b
        );
        match self.backend {
            Backend::Cpu => gemm::sgemm_portable(g, &a.data, &b.data, &mut c.data),
            #[cfg(feature = "blas")]
            Backend::Blas => gemm::sgemm_blas(g, &a.data, &b.data, &mut c.data),
            #[cfg(not(feature = "blas"))]
            Backend::Blas => return Err(DeviceError::BackendUnavailable(Backend::Blas.name())),
        }
        Ok(())
    }

    /// Blocks until every enqueued kernel has completed.
    pub fn finish(&self) {
        trace!("finish on {}", self.backend);
    }
}

fn check_extent(needed: usize, actual: usize) -> Result<(), DeviceError> {
    if needed > actual {
        return Err(DeviceError::BufferSize {
            expected: needed,
            actual,
        });
    }
    Ok(())
}

/// A float buffer resident on a [`Device`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuffer {
    data: Vec<f32>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrites the whole buffer with `host`.
    pub fn copy_from_host(&mut self, host: &[f32]) -> Result<(), DeviceError> {
        if host.len() != self.data.len() {
            return Err(DeviceError::BufferSize {
                expected: self.data.len(),
                actual: host.len(),
            });
        }
        self.data.copy_from_slice(host);
        Ok(())
    }

    /// Copies the whole buffer into `host`.
    pub fn copy_to_host(&self, host: &mut [f32]) -> Result<(), DeviceError> {
        if host.len() != self.data.len() {
            return Err(DeviceError::BufferSize {
                expected: self.data.len(),
                actual: host.len(),
            });
        }
        host.copy_from_slice(&self.data);
        Ok(())
    }

    /// Reads the buffer back into a freshly allocated host vector.
    pub fn to_host(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Consumes the buffer, handing its storage to the host.
    pub fn into_host(self) -> Vec<f32> {
        self.data
    }

    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}
