use super::PoolingShape;
use crate::error::{check_len, EngineError, EngineResult};

/// Backward pass for max pooling.
///
/// A selector is the position of the winning element inside its window,
/// `dy * pooling_size + dx`, with the first maximum in row-major order winning
/// exactly as in the forward kernels. Each output error flows back to its
/// selected input; every other input, including the unpooled remainder, gets
/// zero.
pub struct PoolingBackprop {
    shape: PoolingShape,
}

impl PoolingBackprop {
    pub fn new(shape: PoolingShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> &PoolingShape {
        &self.shape
    }

    /// Recomputes the window winners for a forward input.
    pub fn selectors(&self, batch_size: usize, input: &[f32]) -> EngineResult<Vec<u32>> {
        let s = &self.shape;
        s.check_input(batch_size, input.len())?;

        let board = s.input_board_size();
        let pool = s.pooling_size();
        let out_board = s.output_board_size();
        let mut selectors = vec![0u32; batch_size * s.output_cube_size()];

        for plane in 0..batch_size * s.num_planes() {
            let in_base = plane * board * board;
            let out_base = plane * out_board * out_board;
            for out_row in 0..out_board {
                for out_col in 0..out_board {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_idx = 0u32;
                    for dy in 0..pool {
                        for dx in 0..pool {
                            let v = input
                                [in_base + (out_row * pool + dy) * board + out_col * pool + dx];
                            if v > best {
                                best = v;
                                best_idx = (dy * pool + dx) as u32;
                            }
                        }
                    }
                    selectors[out_base + out_row * out_board + out_col] = best_idx;
                }
            }
        }
        Ok(selectors)
    }

    /// Routes pooled-output errors back onto the input board.
    pub fn backprop_errors(
        &self,
        batch_size: usize,
        errors: &[f32],
        selectors: &[u32],
    ) -> EngineResult<Vec<f32>> {
        let s = &self.shape;
        s.check_output(batch_size, errors.len())?;
        check_len("selectors", errors.len(), selectors.len())?;

        let board = s.input_board_size();
        let pool = s.pooling_size();
        let out_board = s.output_board_size();
        if let Some(index) = selectors.iter().position(|&sel| sel as usize >= pool * pool) {
            return Err(EngineError::InvalidSelector {
                index,
                selector: selectors[index],
                pooling_size: pool,
            });
        }
        let mut upstream = vec![0.0f32; batch_size * s.input_cube_size()];

        for plane in 0..batch_size * s.num_planes() {
            let in_base = plane * board * board;
            let out_base = plane * out_board * out_board;
            for out_row in 0..out_board {
                for out_col in 0..out_board {
                    let i = out_base + out_row * out_board + out_col;
                    let sel = selectors[i] as usize;
                    let (dy, dx) = (sel / pool, sel % pool);
                    upstream[in_base + (out_row * pool + dy) * board + out_col * pool + dx] +=
                        errors[i];
                }
            }
        }
        Ok(upstream)
    }
}
