//! Convolutional layer geometry
//!
//! [`LayerGeometry`] is the single descriptor every engine receives. Its derived
//! sizes are recomputed by each setter, so a geometry can never be observed with
//! derived fields that disagree with its inputs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Input and derived dimensions of one convolutional layer.
///
/// Sizes are signed: a filter larger than an unpadded input yields a zero or
/// negative output board instead of a panic. Engines reject such geometry when
/// they are constructed.
///
/// # Example
///
/// ```
/// use convnet_engine::geometry::LayerGeometry;
///
/// let mut dim = LayerGeometry::default();
/// dim.set_input_planes(32)
///     .set_input_board_size(28)
///     .set_num_filters(32)
///     .set_filter_size(5)
///     .set_biased(true)
///     .set_pad_zeros(true);
/// assert_eq!(dim.output_board_size(), 28);
/// dim.set_pad_zeros(false);
/// assert_eq!(dim.output_board_size(), 24);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GeometryParams", into = "GeometryParams")]
pub struct LayerGeometry {
    input_planes: i32,
    input_board_size: i32,
    num_filters: i32,
    filter_size: i32,
    pad_zeros: bool,
    biased: bool,

    is_even: bool,
    output_board_size: i32,
    input_cube_size: i32,
    filters_size: i32,
    output_cube_size: i32,
    half_filter_size: i32,
}

/// The independent inputs of a geometry, as they appear in config files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct GeometryParams {
    input_planes: i32,
    input_board_size: i32,
    num_filters: i32,
    filter_size: i32,
    #[serde(default)]
    pad_zeros: bool,
    #[serde(default)]
    biased: bool,
}

impl From<GeometryParams> for LayerGeometry {
    fn from(p: GeometryParams) -> Self {
        LayerGeometry::new(
            p.input_planes,
            p.input_board_size,
            p.num_filters,
            p.filter_size,
            p.pad_zeros,
            p.biased,
        )
    }
}

impl From<LayerGeometry> for GeometryParams {
    fn from(g: LayerGeometry) -> Self {
        GeometryParams {
            input_planes: g.input_planes,
            input_board_size: g.input_board_size,
            num_filters: g.num_filters,
            filter_size: g.filter_size,
            pad_zeros: g.pad_zeros,
            biased: g.biased,
        }
    }
}

impl Default for LayerGeometry {
    fn default() -> Self {
        Self {
            input_planes: 0,
            input_board_size: 0,
            num_filters: 0,
            filter_size: 0,
            pad_zeros: false,
            biased: false,
            is_even: false,
            output_board_size: 0,
            input_cube_size: 0,
            filters_size: 0,
            output_cube_size: 0,
            half_filter_size: 0,
        }
        .derived()
    }
}

impl LayerGeometry {
    pub fn new(
        input_planes: i32,
        input_board_size: i32,
        num_filters: i32,
        filter_size: i32,
        pad_zeros: bool,
        biased: bool,
    ) -> Self {
        Self {
            input_planes,
            input_board_size,
            num_filters,
            filter_size,
            pad_zeros,
            biased,
            ..Self::default()
        }
        .derived()
    }

    pub fn set_input_planes(&mut self, input_planes: i32) -> &mut Self {
        self.input_planes = input_planes;
        self.derive_others();
        self
    }

    pub fn set_input_board_size(&mut self, input_board_size: i32) -> &mut Self {
        self.input_board_size = input_board_size;
        self.derive_others();
        self
    }

    pub fn set_num_filters(&mut self, num_filters: i32) -> &mut Self {
        self.num_filters = num_filters;
        self.derive_others();
        self
    }

    pub fn set_filter_size(&mut self, filter_size: i32) -> &mut Self {
        self.filter_size = filter_size;
        self.derive_others();
        self
    }

    pub fn set_biased(&mut self, biased: bool) -> &mut Self {
        self.biased = biased;
        self.derive_others();
        self
    }

    pub fn set_pad_zeros(&mut self, pad_zeros: bool) -> &mut Self {
        self.pad_zeros = pad_zeros;
        self.derive_others();
        self
    }

    fn derived(mut self) -> Self {
        self.derive_others();
        self
    }

    fn derive_others(&mut self) {
        self.is_even = self.filter_size % 2 == 0;
        self.output_board_size = if self.pad_zeros {
            if self.is_even {
                self.input_board_size.wrapping_add(1)
            } else {
                self.input_board_size
            }
        } else {
            self.input_board_size
                .wrapping_sub(self.filter_size)
                .wrapping_add(1)
        };
        // Wraps on overflow; `validate` rejects wrapped sizes.
        self.input_cube_size = self
            .input_planes
            .wrapping_mul(self.input_board_size)
            .wrapping_mul(self.input_board_size);
        self.filters_size = self
            .input_planes
            .wrapping_mul(self.num_filters)
            .wrapping_mul(self.filter_size)
            .wrapping_mul(self.filter_size);
        self.output_cube_size = self
            .num_filters
            .wrapping_mul(self.output_board_size)
            .wrapping_mul(self.output_board_size);
        self.half_filter_size = self.filter_size >> 1;
    }

    pub fn input_planes(&self) -> i32 {
        self.input_planes
    }

    pub fn input_board_size(&self) -> i32 {
        self.input_board_size
    }

    pub fn num_filters(&self) -> i32 {
        self.num_filters
    }

    pub fn filter_size(&self) -> i32 {
        self.filter_size
    }

    pub fn pad_zeros(&self) -> bool {
        self.pad_zeros
    }

    pub fn biased(&self) -> bool {
        self.biased
    }

    pub fn is_even(&self) -> bool {
        self.is_even
    }

    pub fn output_board_size(&self) -> i32 {
        self.output_board_size
    }

    pub fn input_cube_size(&self) -> i32 {
        self.input_cube_size
    }

    pub fn filters_size(&self) -> i32 {
        self.filters_size
    }

    pub fn output_cube_size(&self) -> i32 {
        self.output_cube_size
    }

    pub fn half_filter_size(&self) -> i32 {
        self.half_filter_size
    }

    /// Offset subtracted from `out_row + filter_row` to reach the input row.
    ///
    /// Padded layers centre the filter on the output position; unpadded layers
    /// anchor its top-left corner.
    pub fn anchor_offset(&self) -> i32 {
        if self.pad_zeros {
            self.half_filter_size
        } else {
            0
        }
    }

    /// Rejects geometry no kernel can run on.
    pub fn validate(&self) -> EngineResult<()> {
        let checks = [
            ("input_planes", self.input_planes),
            ("input_board_size", self.input_board_size),
            ("num_filters", self.num_filters),
            ("filter_size", self.filter_size),
            ("output_board_size", self.output_board_size),
        ];
        for (name, value) in checks {
            if value <= 0 {
                return Err(EngineError::InvalidGeometry(format!(
                    "{} must be positive, got {} ({})",
                    name, value, self
                )));
            }
        }
        let sizes = [
            (
                "input_cube_size",
                self.input_cube_size,
                [self.input_planes, self.input_board_size, self.input_board_size, 1],
            ),
            (
                "filters_size",
                self.filters_size,
                [self.input_planes, self.num_filters, self.filter_size, self.filter_size],
            ),
            (
                "output_cube_size",
                self.output_cube_size,
                [self.num_filters, self.output_board_size, self.output_board_size, 1],
            ),
        ];
        for (name, value, factors) in sizes {
            let exact: i64 = factors.iter().map(|&f| i64::from(f)).product();
            if i64::from(value) != exact {
                return Err(EngineError::InvalidGeometry(format!(
                    "{} overflows i32 ({})",
                    name, self
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for LayerGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LayerGeometry{{ inputPlanes={} inputBoardSize={} numFilters={} filterSize={} \
             outputBoardSize={} padZeros={} biased={} }}",
            self.input_planes,
            self.input_board_size,
            self.num_filters,
            self.filter_size,
            self.output_board_size,
            self.pad_zeros,
            self.biased
        )
    }
}
