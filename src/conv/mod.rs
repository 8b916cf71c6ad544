//! Convolutional engines
//!
//! Three engines share one geometry and one activation:
//! - [`propagate`]: forward convolution, bias and activation
//! - [`backprop_errors`]: error gradient for the upstream layer
//! - [`backprop_weights`]: weight and bias gradients
//!
//! Each engine is a trait with several interchangeable implementations, picked
//! through `instance`, `instance_for_test` or `instance_specific(index, ..)`.
//! Every implementation must produce the same numbers as the reference one.
//!
//! Indexing convention shared by all kernels: output position `(or, oc)` and
//! filter offset `(kr, kc)` read input position
//! `(or + kr - offset, oc + kc - offset)`, where `offset` is
//! [`LayerGeometry::anchor_offset`]. Positions outside the board contribute
//! zero.

pub mod backprop_errors;
pub mod backprop_weights;
pub mod propagate;

use crate::error::{check_len, EngineResult};
use crate::geometry::LayerGeometry;
use crate::utils::ActivationFunction;

/// Validated, unsigned view of a [`LayerGeometry`] used inside the kernels.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConvShape {
    pub planes: usize,
    pub board: usize,
    pub filters: usize,
    pub filter_size: usize,
    pub out_board: usize,
    pub offset: isize,
    pub biased: bool,
}

impl ConvShape {
    pub fn from_geometry(dim: &LayerGeometry) -> EngineResult<Self> {
        dim.validate()?;
        Ok(Self {
            planes: dim.input_planes() as usize,
            board: dim.input_board_size() as usize,
            filters: dim.num_filters() as usize,
            filter_size: dim.filter_size() as usize,
            out_board: dim.output_board_size() as usize,
            offset: dim.anchor_offset() as isize,
            biased: dim.biased(),
        })
    }

    pub fn input_cube(&self) -> usize {
        self.planes * self.board * self.board
    }

    pub fn output_area(&self) -> usize {
        self.out_board * self.out_board
    }

    pub fn output_cube(&self) -> usize {
        self.filters * self.output_area()
    }

    pub fn filter_area(&self) -> usize {
        self.filter_size * self.filter_size
    }

    /// Length of one unrolled receptive field: planes x filter x filter.
    pub fn patch_len(&self) -> usize {
        self.planes * self.filter_area()
    }

    pub fn weights_len(&self) -> usize {
        self.filters * self.patch_len()
    }

    /// Input row (or column) read by output row `out` at filter row `k`.
    #[inline]
    pub fn input_pos(&self, out: usize, k: usize) -> Option<usize> {
        let pos = out as isize + k as isize - self.offset;
        if pos >= 0 && (pos as usize) < self.board {
            Some(pos as usize)
        } else {
            None
        }
    }

    /// Output row (or column) that reads input row `input` at filter row `k`.
    #[inline]
    pub fn output_pos(&self, input: usize, k: usize) -> Option<usize> {
        let pos = input as isize + self.offset - k as isize;
        if pos >= 0 && (pos as usize) < self.out_board {
            Some(pos as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn weight_index(&self, filter: usize, plane: usize, kr: usize, kc: usize) -> usize {
        ((filter * self.planes + plane) * self.filter_size + kr) * self.filter_size + kc
    }

    pub fn check_input(&self, batch_size: usize, input: &[f32]) -> EngineResult<()> {
        check_len("input", batch_size * self.input_cube(), input.len())
    }

    pub fn check_output(&self, what: &'static str, batch_size: usize, data: &[f32]) -> EngineResult<()> {
        check_len(what, batch_size * self.output_cube(), data.len())
    }

    pub fn check_weights(&self, weights: &[f32]) -> EngineResult<()> {
        check_len("weights", self.weights_len(), weights.len())
    }

    /// Bias weights are only inspected on biased layers.
    pub fn check_bias<'a>(&self, bias_weights: Option<&'a [f32]>) -> EngineResult<Option<&'a [f32]>> {
        if !self.biased {
            return Ok(None);
        }
        let bias = bias_weights.unwrap_or(&[]);
        check_len("bias weights", self.filters, bias.len())?;
        Ok(Some(bias))
    }
}

/// Per-output gradient `act'(result) * error`, the quantity every backward
/// kernel distributes over the receptive field.
pub(crate) fn output_gradients(
    activation: &dyn ActivationFunction,
    results: &[f32],
    errors: &[f32],
) -> Vec<f32> {
    results
        .iter()
        .zip(errors)
        .map(|(&result, &error)| activation.derivative(result) * error)
        .collect()
}

/// Unrolls one batch item into a `patch_len x output_area` matrix.
pub(crate) fn im2col(shape: &ConvShape, input: &[f32], col: &mut [f32]) {
    let n = shape.output_area();
    let k = shape.filter_size;
    for plane in 0..shape.planes {
        let plane_base = plane * shape.board * shape.board;
        for kr in 0..k {
            for kc in 0..k {
                let row = (plane * k + kr) * k + kc;
                let col_row = &mut col[row * n..(row + 1) * n];
                for or in 0..shape.out_board {
                    let in_row = shape.input_pos(or, kr);
                    for oc in 0..shape.out_board {
                        col_row[or * shape.out_board + oc] =
                            match (in_row, shape.input_pos(oc, kc)) {
                                (Some(r), Some(c)) => input[plane_base + r * shape.board + c],
                                _ => 0.0,
                            };
                    }
                }
            }
        }
    }
}

/// Folds a `patch_len x output_area` matrix back onto one batch item, adding
/// overlapping contributions.
pub(crate) fn col2im_add(shape: &ConvShape, col: &[f32], upstream: &mut [f32]) {
    let n = shape.output_area();
    let k = shape.filter_size;
    for plane in 0..shape.planes {
        let plane_base = plane * shape.board * shape.board;
        for kr in 0..k {
            for kc in 0..k {
                let row = (plane * k + kr) * k + kc;
                let col_row = &col[row * n..(row + 1) * n];
                for or in 0..shape.out_board {
                    let Some(r) = shape.input_pos(or, kr) else {
                        continue;
                    };
                    for oc in 0..shape.out_board {
                        if let Some(c) = shape.input_pos(oc, kc) {
                            upstream[plane_base + r * shape.board + c] +=
                                col_row[or * shape.out_board + oc];
                        }
                    }
                }
            }
        }
    }
}
