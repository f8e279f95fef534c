use std::fmt::Write;

use ndarray::{Array3, ArrayView3, ArrayViewMut3};

use crate::{
    codec::{DistanceCodec, INSIDE_SENTINEL, OUTSIDE_SENTINEL, is_in_band},
    error::{Result, SplatError},
    geometry::{Bounds, GridGeometry},
    types::{Code, Index3, Real, Vector},
};

/// Dense voxel grid holding one quantized distance [`Code`] per voxel.
///
/// Codes are stored in an [`Array3`] of shape `(nx, ny, nz)` and indexed `[i, j, k]`.
/// A fresh grid is filled with [`OUTSIDE_SENTINEL`]. After a distance transform has run
/// the grid also remembers the [`DistanceCodec`] it was written with, so downstream
/// consumers can decode cells without knowing the transform's configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceGrid {
    geometry: GridGeometry,
    codes: Array3<Code>,
    codec: Option<DistanceCodec>,
}

impl DistanceGrid {
    /// Allocates a grid for `geometry` with every cell set to [`OUTSIDE_SENTINEL`].
    pub fn new(geometry: GridGeometry) -> Self {
        let [nx, ny, nz] = geometry.dimensions();
        Self {
            geometry,
            codes: Array3::from_elem((nx, ny, nz), OUTSIDE_SENTINEL),
            codec: None,
        }
    }

    /// Wraps existing storage.
    ///
    /// Returns [`SplatError::StorageShapeMismatch`] if `codes` does not have the
    /// shape given by `geometry`.
    pub fn from_codes(geometry: GridGeometry, codes: Array3<Code>) -> Result<Self> {
        let expected = geometry.dimensions();
        let found = {
            let dim = codes.dim();
            [dim.0, dim.1, dim.2]
        };
        if expected != found {
            return Err(SplatError::StorageShapeMismatch { expected, found });
        }
        Ok(Self {
            geometry,
            codes,
            codec: None,
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.geometry.dimensions()
    }

    pub fn voxel_size(&self) -> Vector {
        self.geometry.voxel_size()
    }

    pub fn bounds(&self) -> Bounds {
        self.geometry.bounds()
    }

    /// The codec of the last transform written into this grid, if any.
    pub fn codec(&self) -> Option<&DistanceCodec> {
        self.codec.as_ref()
    }

    pub(crate) fn set_codec(&mut self, codec: DistanceCodec) {
        self.codec = Some(codec);
    }

    /// Returns the code at `(i, j, k)`, or `None` if the index is outside the grid.
    pub fn code(&self, i: usize, j: usize, k: usize) -> Option<Code> {
        self.codes.get([i, j, k]).copied()
    }

    /// Sets the code at `(i, j, k)`. Out-of-range writes are ignored and return `false`.
    pub fn set_code(&mut self, i: usize, j: usize, k: usize, code: Code) -> bool {
        match self.codes.get_mut([i, j, k]) {
            Some(cell) => {
                *cell = code;
                true
            }
            None => false,
        }
    }

    /// Decoded unsigned distance at `(i, j, k)`.
    ///
    /// `None` for sentinels, out-of-range indices, and grids no transform has written.
    pub fn distance(&self, i: usize, j: usize, k: usize) -> Option<Real> {
        let codec = self.codec.as_ref()?;
        codec.decode_cell(self.code(i, j, k)?)
    }

    /// Decoded distance at `(i, j, k)`, negative for cells classified inside.
    pub fn signed_distance(&self, i: usize, j: usize, k: usize) -> Option<Real> {
        let codec = self.codec.as_ref()?;
        codec.decode_signed(self.code(i, j, k)?)
    }

    /// `true` if the cell holds either sentinel.
    pub fn is_sentinel(&self, i: usize, j: usize, k: usize) -> bool {
        self.code(i, j, k).is_some_and(|c| !is_in_band(c))
    }

    pub fn codes(&self) -> ArrayView3<'_, Code> {
        self.codes.view()
    }

    pub(crate) fn codes_mut(&mut self) -> ArrayViewMut3<'_, Code> {
        self.codes.view_mut()
    }

    /// Consumes the grid and returns its raw storage.
    pub fn into_codes(self) -> Array3<Code> {
        self.codes
    }

    pub fn fill(&mut self, code: Code) {
        self.codes.fill(code);
    }

    /// Iterates over every cell as `([i, j, k], code)`.
    pub fn indexed_codes(&self) -> impl Iterator<Item = (Index3, Code)> + '_ {
        self.codes
            .indexed_iter()
            .map(|((i, j, k), &code)| ([i, j, k], code))
    }

    /// Number of cells holding a real distance rather than a sentinel.
    pub fn in_band_count(&self) -> usize {
        self.codes.iter().filter(|&&c| is_in_band(c)).count()
    }

    /// Renders the `z = k` plane as text, one row per `j`, for debugging.
    ///
    /// `+` marks [`OUTSIDE_SENTINEL`], `-` marks [`INSIDE_SENTINEL`].
    pub fn format_slice(&self, k: usize) -> String {
        let [nx, ny, nz] = self.dimensions();
        let mut out = String::new();
        if k >= nz {
            return out;
        }
        for j in 0..ny {
            for i in 0..nx {
                let _ = match self.codes[[i, j, k]] {
                    OUTSIDE_SENTINEL => write!(out, "{:>6}", "+"),
                    INSIDE_SENTINEL => write!(out, "{:>6}", "-"),
                    code => write!(out, "{code:>6}"),
                };
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn geometry() -> GridGeometry {
        GridGeometry::from_origin(Point::origin(), [4, 3, 2], 0.5).unwrap()
    }

    #[test]
    fn new_grid_is_all_outside_sentinel() {
        let grid = DistanceGrid::new(geometry());
        assert_eq!(grid.codes().dim(), (4, 3, 2));
        assert!(grid.codes().iter().all(|&c| c == OUTSIDE_SENTINEL));
        assert_eq!(grid.in_band_count(), 0);
        assert!(grid.is_sentinel(3, 2, 1));
    }

    #[test]
    fn out_of_range_access_is_tolerated() {
        let mut grid = DistanceGrid::new(geometry());
        assert_eq!(grid.code(4, 0, 0), None);
        assert!(!grid.set_code(0, 3, 0, 1));
        assert!(grid.set_code(1, 2, 1, 7));
        assert_eq!(grid.code(1, 2, 1), Some(7));
    }

    #[test]
    fn distance_needs_a_codec() {
        let mut grid = DistanceGrid::new(geometry());
        grid.set_code(0, 0, 0, 20);
        assert_eq!(grid.distance(0, 0, 0), None);
        grid.set_codec(DistanceCodec::new(0.5, 10));
        assert_eq!(grid.distance(0, 0, 0), Some(1.0));
        assert_eq!(grid.distance(1, 0, 0), None);
    }

    #[test]
    fn storage_shape_must_match_geometry() {
        let err = DistanceGrid::from_codes(geometry(), Array3::zeros((4, 3, 3))).unwrap_err();
        assert!(matches!(
            err,
            SplatError::StorageShapeMismatch {
                expected: [4, 3, 2],
                found: [4, 3, 3],
            }
        ));
        assert!(DistanceGrid::from_codes(geometry(), Array3::zeros((4, 3, 2))).is_ok());
    }

    #[test]
    fn slice_marks_sentinels() {
        let mut grid = DistanceGrid::new(geometry());
        grid.set_code(1, 0, 0, 12);
        grid.set_code(2, 0, 0, INSIDE_SENTINEL);
        let text = grid.format_slice(0);
        let first = text.lines().next().unwrap();
        assert_eq!(first, "     +    12     -     +");
        assert_eq!(grid.format_slice(5), "");
    }
}
