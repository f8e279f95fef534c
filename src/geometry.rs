use crate::{
    error::{Result, SplatError},
    types::{Index3, Point, Real, Vector},
};

/// Relative tolerance used when checking that `dimension × voxel_size` spans the bounds.
const EXTENT_TOLERANCE: Real = 1e-9;

/// Axis-aligned world-space box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Builds bounds from the flat `(x0, x1, y0, y1, z0, z1)` layout.
    pub fn from_array(b: [Real; 6]) -> Self {
        Self {
            min: Point::new(b[0], b[2], b[4]),
            max: Point::new(b[1], b[3], b[5]),
        }
    }

    /// Returns the bounds in the flat `(x0, x1, y0, y1, z0, z1)` layout.
    pub fn to_array(&self) -> [Real; 6] {
        [
            self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z,
        ]
    }

    pub fn extent(&self) -> Vector {
        self.max - self.min
    }

    /// Grows the box by `margin` on every side.
    pub fn padded(&self, margin: Real) -> Self {
        let m = Vector::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Grows the box to include `p`.
    pub fn encapsulate(&mut self, p: &Point) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }
}

/// Geometry of a regular voxel grid: dimensions, per-axis voxel size and world bounds.
///
/// Doubles as the coordinate mapper between world space and voxel indices.
/// Voxel `(i, j, k)` covers `[min + idx × vs, min + (idx + 1) × vs)` on each axis and its
/// center sits at `min + (idx + 0.5) × vs`.
///
/// ```text
///   min.x                                       max.x
///     |  0  |  1  |  2  |  ...  |  nx-1  |
///        ^ center = min.x + 0.5 × vs.x
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridGeometry {
    dimensions: [usize; 3],
    voxel_size: Vector,
    bounds: Bounds,
}

impl GridGeometry {
    /// Creates a geometry, checking that `dimensions × voxel_size` spans `bounds` on every axis.
    ///
    /// Returns [`SplatError::GeometryMismatch`] when they disagree.
    pub fn new(dimensions: [usize; 3], voxel_size: Vector, bounds: Bounds) -> Result<Self> {
        validate_dimensions(dimensions)?;
        validate_voxel_size(&voxel_size)?;

        let extent = bounds.extent();
        for axis in 0..3 {
            let spanned = dimensions[axis] as Real * voxel_size[axis];
            let tolerance = EXTENT_TOLERANCE * spanned.abs().max(extent[axis].abs());
            if !extent[axis].is_finite() || (spanned - extent[axis]).abs() > tolerance {
                return Err(SplatError::GeometryMismatch {
                    axis,
                    cells: dimensions[axis],
                    voxel_size: voxel_size[axis],
                    extent: extent[axis],
                });
            }
        }

        Ok(Self {
            dimensions,
            voxel_size,
            bounds,
        })
    }

    /// Creates a geometry with cubic voxels whose minimum corner sits at `origin`.
    pub fn from_origin(origin: Point, dimensions: [usize; 3], voxel_size: Real) -> Result<Self> {
        validate_dimensions(dimensions)?;
        let vs = Vector::repeat(voxel_size);
        validate_voxel_size(&vs)?;
        let extent = Vector::new(
            dimensions[0] as Real * voxel_size,
            dimensions[1] as Real * voxel_size,
            dimensions[2] as Real * voxel_size,
        );
        Self::new(dimensions, vs, Bounds::new(origin, origin + extent))
    }

    /// Creates the smallest grid of cubic `voxel_size` voxels starting at `bounds.min`
    /// that covers `bounds`.
    ///
    /// The cell count per axis is `ceil(extent / voxel_size)` (at least one) and the
    /// maximum bound is snapped to `min + n × voxel_size`.
    pub fn covering(bounds: Bounds, voxel_size: Real) -> Result<Self> {
        validate_voxel_size(&Vector::repeat(voxel_size))?;
        let extent = bounds.extent();
        let mut dimensions = [0usize; 3];
        for axis in 0..3 {
            let cells = (extent[axis] / voxel_size).ceil();
            if !cells.is_finite() || cells < 0. {
                return Err(SplatError::InvalidDimensions(dimensions));
            }
            dimensions[axis] = (cells as usize).max(1);
        }
        Self::from_origin(bounds.min, dimensions, voxel_size)
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn voxel_size(&self) -> Vector {
        self.voxel_size
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn origin(&self) -> Point {
        self.bounds.min
    }

    /// Total number of voxels.
    pub fn cell_count(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Physical length represented by one quantization step times `subvoxel_resolution`.
    ///
    /// This is the smallest voxel edge, so anisotropic grids keep at least
    /// `subvoxel_resolution` steps per voxel along every axis.
    pub fn quantization_unit(&self) -> Real {
        self.voxel_size.min()
    }

    /// Returns the index of the voxel containing `p`.
    ///
    /// Indices outside `[0, n)` are returned as-is; callers clamp or skip them.
    #[inline]
    pub fn world_to_grid(&self, p: &Point) -> [i64; 3] {
        let local = p - self.bounds.min;
        [
            (local.x / self.voxel_size.x).floor() as i64,
            (local.y / self.voxel_size.y).floor() as i64,
            (local.z / self.voxel_size.z).floor() as i64,
        ]
    }

    /// Returns the world-space center of voxel `(i, j, k)`.
    #[inline]
    pub fn grid_to_world(&self, i: usize, j: usize, k: usize) -> Point {
        Point::new(
            self.axis_center(0, i),
            self.axis_center(1, j),
            self.axis_center(2, k),
        )
    }

    /// World-space coordinate of the center of voxel `index` along `axis`.
    #[inline]
    pub fn axis_center(&self, axis: usize, index: usize) -> Real {
        self.bounds.min[axis] + (index as Real + 0.5) * self.voxel_size[axis]
    }

    pub fn contains_index(&self, index: [i64; 3]) -> bool {
        index
            .iter()
            .zip(self.dimensions.iter())
            .all(|(&i, &n)| i >= 0 && (i as u64) < n as u64)
    }

    /// Converts a signed index into a grid index if it lies inside the grid.
    pub fn checked_index(&self, index: [i64; 3]) -> Option<Index3> {
        self.contains_index(index)
            .then(|| [index[0] as usize, index[1] as usize, index[2] as usize])
    }
}

fn validate_dimensions(dimensions: [usize; 3]) -> Result<()> {
    if dimensions.iter().any(|&n| n == 0) {
        return Err(SplatError::InvalidDimensions(dimensions));
    }
    Ok(())
}

fn validate_voxel_size(voxel_size: &Vector) -> Result<()> {
    if voxel_size.iter().any(|&v| !(v.is_finite() && v > 0.)) {
        return Err(SplatError::InvalidVoxelSize([
            voxel_size.x,
            voxel_size.y,
            voxel_size.z,
        ]));
    }
    Ok(())
}
