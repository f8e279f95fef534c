use crate::{
    error::{Result, SplatError},
    geometry::{Bounds, GridGeometry},
    types::{Point, Real},
};

/// Append-only ordered collection of world-space sample points.
///
/// Order carries no meaning for the distance transform; duplicates are allowed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn add_point(&mut self, x: Real, y: Real, z: Real) {
        self.points.push(Point::new(x, y, z));
    }

    pub fn push(&mut self, p: Point) {
        self.points.push(p);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[Point] {
        &self.points
    }

    /// Axis-aligned bounds of all finite points, or `None` if there are none.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut finite = self.points.iter().filter(|p| p.iter().all(|c| c.is_finite()));
        let first = finite.next()?;
        let mut bounds = Bounds::new(*first, *first);
        for p in finite {
            bounds.encapsulate(p);
        }
        Some(bounds)
    }

    /// Grid of cubic voxels covering the cloud's bounds grown by `margin` on every side.
    pub fn covering_grid(&self, voxel_size: Real, margin: Real) -> Result<GridGeometry> {
        let bounds = self.bounds().ok_or(SplatError::EmptyPointCloud)?;
        GridGeometry::covering(bounds.padded(margin), voxel_size)
    }
}

impl FromIterator<Point> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl Extend<Point> for PointCloud {
    fn extend<I: IntoIterator<Item = Point>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
