//! Max pooling
//!
//! Maps `[batch, planes, S, S]` to `[batch, planes, S / P, S / P]` by taking
//! the maximum of each non-overlapping `P x P` window.
//!
//! Remainder policy: the output size is floor-divided. When `S` is not a
//! multiple of `P`, the trailing `S % P` rows and columns belong to no window;
//! they are ignored going forward and receive zero error going backward.
//!
//! Variants (index for [`instance_specific`]):
//! - 0 [`PoolingPropagateCpu`]: one pass over each window
//! - 1 [`PoolingPropagateSeparable`]: row maxima, then column maxima, in device buffers

mod backprop;
mod cpu;
mod separable;

pub use backprop::PoolingBackprop;
pub use cpu::PoolingPropagateCpu;
pub use separable::PoolingPropagateSeparable;

use log::debug;
use std::fmt;

use crate::device::{Device, DeviceBuffer};
use crate::error::{check_len, EngineError, EngineResult};

/// Validated pooling dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingShape {
    num_planes: usize,
    input_board_size: usize,
    pooling_size: usize,
    output_board_size: usize,
}

impl PoolingShape {
    pub fn new(num_planes: usize, input_board_size: usize, pooling_size: usize) -> EngineResult<Self> {
        if pooling_size == 0 {
            return Err(EngineError::InvalidGeometry(
                "pooling_size must be positive".to_string(),
            ));
        }
        let output_board_size = input_board_size / pooling_size;
        if num_planes == 0 || output_board_size == 0 {
            return Err(EngineError::InvalidGeometry(format!(
                "pooling {} planes of {}x{} by {} leaves no output",
                num_planes, input_board_size, input_board_size, pooling_size
            )));
        }
        Ok(Self {
            num_planes,
            input_board_size,
            pooling_size,
            output_board_size,
        })
    }

    pub fn num_planes(&self) -> usize {
        self.num_planes
    }

    pub fn input_board_size(&self) -> usize {
        self.input_board_size
    }

    pub fn pooling_size(&self) -> usize {
        self.pooling_size
    }

    pub fn output_board_size(&self) -> usize {
        self.output_board_size
    }

    pub fn input_cube_size(&self) -> usize {
        self.num_planes * self.input_board_size * self.input_board_size
    }

    pub fn output_cube_size(&self) -> usize {
        self.num_planes * self.output_board_size * self.output_board_size
    }

    pub(crate) fn check_input(&self, batch_size: usize, len: usize) -> EngineResult<()> {
        check_len("pooling input", batch_size * self.input_cube_size(), len)
    }

    pub(crate) fn check_output(&self, batch_size: usize, len: usize) -> EngineResult<()> {
        check_len("pooling output", batch_size * self.output_cube_size(), len)
    }
}

impl fmt::Display for PoolingShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolingShape{{ numPlanes={} inputBoardSize={} poolingSize={} outputBoardSize={} }}",
            self.num_planes, self.input_board_size, self.pooling_size, self.output_board_size
        )
    }
}

/// Forward max pooling.
pub trait PoolingPropagate {
    /// Pools `input` into the caller's `output` buffer, both on the device.
    fn propagate_buffers(
        &self,
        batch_size: usize,
        input: &DeviceBuffer,
        output: &mut DeviceBuffer,
    ) -> EngineResult<()>;

    fn device(&self) -> &Device;

    fn shape(&self) -> &PoolingShape;

    fn name(&self) -> &'static str;

    /// Host convenience: uploads `input`, pools, and returns the output.
    fn propagate(&self, batch_size: usize, input: &[f32]) -> EngineResult<Vec<f32>> {
        self.shape().check_input(batch_size, input.len())?;
        let input_buf = self.device().upload(input);
        let mut output_buf = self
            .device()
            .create_buffer(batch_size * self.shape().output_cube_size());
        self.propagate_buffers(batch_size, &input_buf, &mut output_buf)?;
        Ok(output_buf.into_host())
    }
}

pub const POOLING_VARIANTS: usize = 2;

/// Separable on accelerated devices, the single-pass kernel otherwise.
pub fn instance(
    device: &Device,
    num_planes: usize,
    input_board_size: usize,
    pooling_size: usize,
) -> EngineResult<Box<dyn PoolingPropagate>> {
    let index = if device.is_accelerated() { 1 } else { 0 };
    debug!(
        "pooling: picked variant {} for pooling size {} on {}",
        index,
        pooling_size,
        device.backend()
    );
    instance_specific(index, device, num_planes, input_board_size, pooling_size)
}

pub fn instance_for_test(
    device: &Device,
    num_planes: usize,
    input_board_size: usize,
    pooling_size: usize,
) -> EngineResult<Box<dyn PoolingPropagate>> {
    instance_specific(0, device, num_planes, input_board_size, pooling_size)
}

pub fn instance_specific(
    index: usize,
    device: &Device,
    num_planes: usize,
    input_board_size: usize,
    pooling_size: usize,
) -> EngineResult<Box<dyn PoolingPropagate>> {
    let shape = PoolingShape::new(num_planes, input_board_size, pooling_size)?;
    match index {
        0 => Ok(Box::new(PoolingPropagateCpu::new(device.clone(), shape))),
        1 => Ok(Box::new(PoolingPropagateSeparable::new(device.clone(), shape))),
        _ => Err(EngineError::UnknownVariant {
            component: "pooling",
            index,
        }),
    }
}
