use std::sync::Arc;

use ndarray::{Array3, ArrayViewMut3, Axis};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    codec::{DistanceCodec, INSIDE_SENTINEL, OUTSIDE_SENTINEL},
    error::{Result, SplatError},
    geometry::GridGeometry,
    grid::DistanceGrid,
    point_cloud::PointCloud,
    splat::{InfluenceBox, SlabPlan, collect_influence_boxes},
    types::{Code, Index3, Point, Real},
};

/// Marks a cell no point has reached in a [`NearestPointGrid`].
pub const NO_POINT: u32 = u32::MAX;

/// Configuration of a [`DistanceToPointSet`] run.
///
/// ```rust,ignore
/// let config = DistanceTransformConfig::default()
///     .with_max_distance(1.0)
///     .with_subvoxel_resolution(100)
///     .with_thread_count(8);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceTransformConfig {
    /// Narrow-band radius in world units. Cells farther than this from every point keep
    /// the sentinel.
    pub max_distance: Real,
    /// Quantization steps per voxel-size unit.
    pub subvoxel_resolution: u32,
    /// Worker threads used for the splat.
    pub thread_count: usize,
    /// Narrow-band radius for cells classified inside. `None` means "same as
    /// [`max_distance`](Self::max_distance)". Only used with an [`InsideTester`].
    pub max_inside_distance: Option<Real>,
    /// X index planes per slab. Smaller slabs balance better, larger slabs revisit fewer
    /// influence boxes.
    pub slab_thickness: usize,
}

impl Default for DistanceTransformConfig {
    fn default() -> Self {
        Self {
            max_distance: 1.,
            subvoxel_resolution: 100,
            thread_count: std::thread::available_parallelism().map_or(1, |n| n.get()),
            max_inside_distance: None,
            slab_thickness: 4,
        }
    }
}

impl DistanceTransformConfig {
    pub fn with_max_distance(mut self, max_distance: Real) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_subvoxel_resolution(mut self, subvoxel_resolution: u32) -> Self {
        self.subvoxel_resolution = subvoxel_resolution;
        self
    }

    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_max_inside_distance(mut self, max_inside_distance: Real) -> Self {
        self.max_inside_distance = Some(max_inside_distance);
        self
    }

    pub fn with_slab_thickness(mut self, slab_thickness: usize) -> Self {
        self.slab_thickness = slab_thickness;
        self
    }

    /// Effective inside band radius.
    pub fn inside_distance(&self) -> Real {
        self.max_inside_distance.unwrap_or(self.max_distance)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_distance.is_finite() && self.max_distance > 0.) {
            return Err(SplatError::InvalidMaxDistance(self.max_distance));
        }
        if let Some(inside) = self.max_inside_distance {
            if !(inside.is_finite() && inside >= 0.) {
                return Err(SplatError::InvalidInsideDistance(inside));
            }
        }
        if self.subvoxel_resolution == 0 {
            return Err(SplatError::InvalidSubvoxelResolution);
        }
        if self.thread_count == 0 {
            return Err(SplatError::InvalidThreadCount);
        }
        if self.slab_thickness == 0 {
            return Err(SplatError::InvalidSlabThickness);
        }
        Ok(())
    }
}

/// Classifies voxels as inside the shape the points sample.
///
/// Supplying one turns the output into a signed field: inside cells start at
/// [`INSIDE_SENTINEL`] and store negated codes.
pub trait InsideTester: Send + Sync {
    fn is_inside(&self, index: Index3) -> bool;
}

impl<F> InsideTester for F
where
    F: Fn(Index3) -> bool + Send + Sync,
{
    fn is_inside(&self, index: Index3) -> bool {
        self(index)
    }
}

/// Counters gathered during one run.
///
/// All of them are independent of thread count and slab thickness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplatStats {
    /// Points in the cloud.
    pub points: usize,
    /// Points skipped because their influence box missed the grid or they were not finite.
    pub culled_points: usize,
    /// Voxel-to-point distances evaluated.
    pub distance_evaluations: u64,
    /// Times a cell was lowered to a smaller code.
    pub cells_written: u64,
}

impl SplatStats {
    fn merge(mut self, other: SplatStats) -> Self {
        self.distance_evaluations += other.distance_evaluations;
        self.cells_written += other.cells_written;
        self
    }
}

/// Per-cell index of the point that produced the cell's code.
#[derive(Clone, Debug, PartialEq)]
pub struct NearestPointGrid {
    indices: Array3<u32>,
}

impl NearestPointGrid {
    fn new(dimensions: [usize; 3]) -> Self {
        let [nx, ny, nz] = dimensions;
        Self {
            indices: Array3::from_elem((nx, ny, nz), NO_POINT),
        }
    }

    /// Index into the cloud of the nearest point, `None` if no point reached the cell.
    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        match self.indices.get([i, j, k]) {
            Some(&NO_POINT) | None => None,
            Some(&index) => Some(index as usize),
        }
    }

    pub fn indices(&self) -> &Array3<u32> {
        &self.indices
    }
}

/// Fills a [`DistanceGrid`] with quantized distances to the nearest point of a cloud.
///
/// Each point splats its distance onto the voxels of its influence box (the box around
/// a sphere of radius `max_distance`), and every cell keeps the smallest code it sees.
/// Work is split into X slabs owned by exactly one worker each, so the result is
/// bit-identical for any thread count.
///
/// ```text
/// 1. initialize            →  every cell = sentinel (inside/outside per tester)
/// 2. collect_influence_boxes  →  one clipped index box per point
/// 3. SlabPlan              →  boxes registered with the slabs they overlap
/// 4. splat_slab (parallel) →  exact distance, quantize, keep minimum
/// ```
pub struct DistanceToPointSet {
    points: Arc<PointCloud>,
    config: DistanceTransformConfig,
    inside_tester: Option<Arc<dyn InsideTester>>,
}

impl DistanceToPointSet {
    /// Returns a configuration error if `config` is invalid.
    pub fn new(points: Arc<PointCloud>, config: DistanceTransformConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            points,
            config,
            inside_tester: None,
        })
    }

    /// Produces a signed field using `tester` to classify cells.
    pub fn with_inside_tester(mut self, tester: impl InsideTester + 'static) -> Self {
        self.inside_tester = Some(Arc::new(tester));
        self
    }

    /// Like [`with_inside_tester`](Self::with_inside_tester) for a tester shared with other owners.
    pub fn with_shared_inside_tester(mut self, tester: Arc<dyn InsideTester>) -> Self {
        self.inside_tester = Some(tester);
        self
    }

    pub fn config(&self) -> &DistanceTransformConfig {
        &self.config
    }

    pub fn points(&self) -> &Arc<PointCloud> {
        &self.points
    }

    /// Codec this transform would use on a grid of `geometry`.
    pub fn codec_for(&self, geometry: &GridGeometry) -> DistanceCodec {
        DistanceCodec::new(geometry.quantization_unit(), self.config.subvoxel_resolution)
    }

    /// Overwrites every cell of `grid` with the distance to the nearest point.
    pub fn execute(&self, grid: &mut DistanceGrid) -> Result<SplatStats> {
        self.run(grid, None)
    }

    /// Like [`execute`](Self::execute), also recording which point each cell's code came from.
    ///
    /// Ties between points at the same code go to the lower point index.
    pub fn execute_with_nearest(
        &self,
        grid: &mut DistanceGrid,
    ) -> Result<(SplatStats, NearestPointGrid)> {
        if self.points.len() >= NO_POINT as usize {
            return Err(SplatError::TooManyPoints(self.points.len()));
        }
        let mut nearest = NearestPointGrid::new(grid.dimensions());
        let stats = self.run(grid, Some(&mut nearest.indices))?;
        Ok((stats, nearest))
    }

    fn run(&self, grid: &mut DistanceGrid, nearest: Option<&mut Array3<u32>>) -> Result<SplatStats> {
        // Everything that can fail happens before the grid is touched.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_count)
            .build()?;

        let geometry = *grid.geometry();
        let codec = self.codec_for(&geometry);
        let signed = self.inside_tester.is_some();
        let radius = if signed {
            self.config.max_distance.max(self.config.inside_distance())
        } else {
            self.config.max_distance
        };

        let (boxes, culled_points) = collect_influence_boxes(&geometry, &self.points, radius);
        let plan = SlabPlan::new(geometry.dimensions()[0], self.config.slab_thickness, &boxes);

        let kernel = SlabKernel {
            geometry: &geometry,
            points: self.points.as_slice(),
            boxes: &boxes,
            plan: &plan,
            inside_tester: self.inside_tester.as_deref(),
            max_outside: self.config.max_distance,
            max_inside: self.config.inside_distance(),
            outside_limit: codec.band_limit(self.config.max_distance),
            inside_limit: codec.band_limit(self.config.inside_distance()),
            codec: &codec,
        };

        let thickness = plan.thickness();
        let mut codes = grid.codes_mut();
        let code_slabs = codes.axis_chunks_iter_mut(Axis(0), thickness);
        let work: Vec<(usize, ArrayViewMut3<Code>, Option<ArrayViewMut3<u32>>)> = match nearest {
            Some(indices) => code_slabs
                .zip(indices.axis_chunks_iter_mut(Axis(0), thickness))
                .enumerate()
                .map(|(slab, (c, n))| (slab, c, Some(n)))
                .collect(),
            None => code_slabs
                .enumerate()
                .map(|(slab, c)| (slab, c, None))
                .collect(),
        };

        let totals = pool.install(|| {
            work.into_par_iter()
                .map(|(slab, codes, nearest)| kernel.splat_slab(slab, codes, nearest))
                .reduce(SplatStats::default, SplatStats::merge)
        });

        grid.set_codec(codec);

        let stats = SplatStats {
            points: self.points.len(),
            culled_points,
            ..totals
        };
        tracing::debug!(
            points = stats.points,
            culled = stats.culled_points,
            evaluations = stats.distance_evaluations,
            writes = stats.cells_written,
            slabs = plan.slab_count(),
            threads = self.config.thread_count,
            "point splat finished"
        );
        Ok(stats)
    }
}

/// Convenience wrapper: allocates a grid for `geometry` and splats `points` into it.
pub fn splat_points(
    points: Arc<PointCloud>,
    geometry: GridGeometry,
    config: DistanceTransformConfig,
) -> Result<DistanceGrid> {
    let transform = DistanceToPointSet::new(points, config)?;
    let mut grid = DistanceGrid::new(geometry);
    transform.execute(&mut grid)?;
    Ok(grid)
}

/// Shared, read-only state for processing slabs.
struct SlabKernel<'a> {
    geometry: &'a GridGeometry,
    points: &'a [Point],
    boxes: &'a [InfluenceBox],
    plan: &'a SlabPlan,
    inside_tester: Option<&'a dyn InsideTester>,
    max_outside: Real,
    max_inside: Real,
    outside_limit: Code,
    inside_limit: Code,
    codec: &'a DistanceCodec,
}

impl SlabKernel<'_> {
    /// Initializes and fills one slab. `codes` and `nearest` are the slab's own planes,
    /// starting at X index `plan.x_offset(slab)`.
    fn splat_slab(
        &self,
        slab: usize,
        mut codes: ArrayViewMut3<Code>,
        mut nearest: Option<ArrayViewMut3<u32>>,
    ) -> SplatStats {
        let x0 = self.plan.x_offset(slab);
        let width = codes.len_of(Axis(0));

        match self.inside_tester {
            Some(tester) => {
                for ((i, j, k), cell) in codes.indexed_iter_mut() {
                    *cell = if tester.is_inside([x0 + i, j, k]) {
                        INSIDE_SENTINEL
                    } else {
                        OUTSIDE_SENTINEL
                    };
                }
            }
            None => codes.fill(OUTSIDE_SENTINEL),
        }

        let mut stats = SplatStats::default();
        for &b in self.plan.boxes_in(slab) {
            let influence = &self.boxes[b];
            let p = &self.points[influence.point];
            let index = influence.point as u32;

            let i_lo = influence.min[0].max(x0);
            let i_hi = influence.max[0].min(x0 + width);
            for x in i_lo..i_hi {
                let dx = self.geometry.axis_center(0, x) - p.x;
                for y in influence.min[1]..influence.max[1] {
                    let dy = self.geometry.axis_center(1, y) - p.y;
                    for z in influence.min[2]..influence.max[2] {
                        let dz = self.geometry.axis_center(2, z) - p.z;
                        let distance = (dx * dx + dy * dy + dz * dz).sqrt();
                        stats.distance_evaluations += 1;

                        let cell = &mut codes[[x - x0, y, z]];
                        let current = *cell;
                        // Negative codes (and the inside sentinel) mark inside cells.
                        let (inside, magnitude) = if current < 0 {
                            (true, -current)
                        } else {
                            (false, current)
                        };
                        let (band, limit) = if inside {
                            (self.max_inside, self.inside_limit)
                        } else {
                            (self.max_outside, self.outside_limit)
                        };
                        if distance > band {
                            continue;
                        }

                        let code = self.codec.encode_clamped(distance, limit);
                        let improves = match nearest.as_mut() {
                            Some(n) => {
                                let owner = &mut n[[x - x0, y, z]];
                                if code < magnitude || (code == magnitude && index < *owner) {
                                    *owner = index;
                                    true
                                } else {
                                    false
                                }
                            }
                            None => code < magnitude,
                        };
                        if improves && code != magnitude {
                            *cell = if inside { -code } else { code };
                            stats.cells_written += 1;
                        }
                    }
                }
            }
        }

        tracing::trace!(
            slab,
            x0,
            boxes = self.plan.boxes_in(slab).len(),
            evaluations = stats.distance_evaluations,
            "slab done"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAX_CODE;

    fn geometry() -> GridGeometry {
        GridGeometry::from_origin(Point::new(-1., -1., -1.), [20, 20, 20], 0.1).unwrap()
    }

    fn cloud(points: &[[Real; 3]]) -> Arc<PointCloud> {
        Arc::new(points.iter().map(|p| Point::new(p[0], p[1], p[2])).collect())
    }

    fn config() -> DistanceTransformConfig {
        DistanceTransformConfig::default()
            .with_max_distance(0.5)
            .with_subvoxel_resolution(10)
            .with_thread_count(2)
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let points = cloud(&[]);
        let bad = [
            (config().with_max_distance(0.), "max"),
            (config().with_max_distance(-1.), "max"),
            (config().with_max_distance(Real::NAN), "max"),
            (config().with_subvoxel_resolution(0), "res"),
            (config().with_thread_count(0), "threads"),
            (config().with_slab_thickness(0), "slab"),
            (config().with_max_inside_distance(-0.5), "inside"),
        ];
        for (c, what) in bad {
            let err = DistanceToPointSet::new(points.clone(), c).err();
            let ok = match (what, err) {
                ("max", Some(SplatError::InvalidMaxDistance(_))) => true,
                ("res", Some(SplatError::InvalidSubvoxelResolution)) => true,
                ("threads", Some(SplatError::InvalidThreadCount)) => true,
                ("slab", Some(SplatError::InvalidSlabThickness)) => true,
                ("inside", Some(SplatError::InvalidInsideDistance(_))) => true,
                _ => false,
            };
            assert!(ok, "{what} not rejected");
        }
    }

    #[test]
    fn point_at_voxel_center_encodes_zero() {
        let g = geometry();
        let c = g.grid_to_world(4, 9, 13);
        let transform =
            DistanceToPointSet::new(cloud(&[[c.x, c.y, c.z]]), config()).unwrap();
        let mut grid = DistanceGrid::new(g);
        transform.execute(&mut grid).unwrap();
        assert_eq!(grid.code(4, 9, 13), Some(0));
        assert_eq!(grid.distance(4, 9, 13), Some(0.));
        // one voxel over is one voxel size away
        assert_eq!(grid.code(5, 9, 13), Some(10));
    }

    #[test]
    fn cells_beyond_the_band_stay_sentinel() {
        let transform = DistanceToPointSet::new(cloud(&[[0.05, 0.05, 0.05]]), config()).unwrap();
        let mut grid = DistanceGrid::new(geometry());
        transform.execute(&mut grid).unwrap();
        let g = *grid.geometry();
        let p = Point::new(0.05, 0.05, 0.05);
        for ([i, j, k], code) in grid.indexed_codes() {
            let d = (g.grid_to_world(i, j, k) - p).norm();
            if d > 0.5 + 1e-9 {
                assert_eq!(code, OUTSIDE_SENTINEL, "cell {i},{j},{k} at {d}");
            } else if d < 0.5 - 1e-9 {
                assert!(code <= 50);
            }
        }
    }

    #[test]
    fn larger_distances_never_overwrite_smaller_ones() {
        let g = geometry();
        let a = g.grid_to_world(10, 10, 10);
        let b = g.grid_to_world(12, 10, 10);
        let points = cloud(&[[a.x, a.y, a.z], [b.x, b.y, b.z]]);
        let transform = DistanceToPointSet::new(points, config()).unwrap();
        let mut grid = DistanceGrid::new(g);
        let stats = transform.execute(&mut grid).unwrap();
        assert_eq!(grid.code(10, 10, 10), Some(0));
        assert_eq!(grid.code(11, 10, 10), Some(10));
        assert_eq!(grid.code(12, 10, 10), Some(0));
        assert_eq!(grid.code(9, 10, 10), Some(10));
        assert_eq!(stats.points, 2);
        assert_eq!(stats.culled_points, 0);
    }

    #[test]
    fn execute_overwrites_previous_contents() {
        let mut grid = DistanceGrid::new(geometry());
        grid.fill(3);
        let transform = DistanceToPointSet::new(cloud(&[[5., 5., 5.]]), config()).unwrap();
        let stats = transform.execute(&mut grid).unwrap();
        assert_eq!(stats.culled_points, 1);
        assert_eq!(stats.distance_evaluations, 0);
        assert!(grid.codes().iter().all(|&c| c == OUTSIDE_SENTINEL));
    }

    #[test]
    fn band_edge_codes_stay_inside_the_band() {
        // 0.455 band, 0.1 voxels, 10 steps: limit is 45 even where rounding would give 46
        let c = config().with_max_distance(0.455).with_subvoxel_resolution(10);
        let transform = DistanceToPointSet::new(cloud(&[[0.05, 0.05, 0.05]]), c).unwrap();
        let mut grid = DistanceGrid::new(geometry());
        transform.execute(&mut grid).unwrap();
        let max = grid
            .codes()
            .iter()
            .copied()
            .filter(|&c| c != OUTSIDE_SENTINEL)
            .max()
            .unwrap();
        assert!(max <= 45);
        assert!(max < MAX_CODE);
    }

    #[test]
    fn nearest_indices_break_ties_by_point_index() {
        let g = geometry();
        let a = g.grid_to_world(8, 10, 10);
        let b = g.grid_to_world(12, 10, 10);
        // point 0 and point 2 are duplicates; 1 sits elsewhere
        let points = cloud(&[[b.x, b.y, b.z], [a.x, a.y, a.z], [b.x, b.y, b.z]]);
        let transform = DistanceToPointSet::new(points, config()).unwrap();
        let mut grid = DistanceGrid::new(g);
        let (_, nearest) = transform.execute_with_nearest(&mut grid).unwrap();
        assert_eq!(nearest.get(12, 10, 10), Some(0));
        assert_eq!(nearest.get(8, 10, 10), Some(1));
        // equidistant from both sites
        assert_eq!(nearest.get(10, 10, 10), Some(0));
        assert_eq!(grid.code(10, 10, 10), Some(20));
        assert_eq!(nearest.get(0, 0, 0), None);
    }

    #[test]
    fn inside_cells_get_negative_codes() {
        let g = geometry();
        let c = g.grid_to_world(10, 10, 10);
        let transform = DistanceToPointSet::new(cloud(&[[c.x, c.y, c.z]]), config())
            .unwrap()
            .with_inside_tester(|[i, _, _]: Index3| i < 10);
        let mut grid = DistanceGrid::new(g);
        transform.execute(&mut grid).unwrap();
        assert_eq!(grid.code(9, 10, 10), Some(-10));
        assert_eq!(grid.code(11, 10, 10), Some(10));
        assert_eq!(grid.signed_distance(8, 10, 10), Some(-0.2));
        assert_eq!(grid.code(0, 0, 0), Some(INSIDE_SENTINEL));
        assert_eq!(grid.code(19, 19, 19), Some(OUTSIDE_SENTINEL));
    }

    #[test]
    fn inside_band_can_differ_from_outside_band() {
        let g = geometry();
        let c = g.grid_to_world(10, 10, 10);
        let transform = DistanceToPointSet::new(
            cloud(&[[c.x, c.y, c.z]]),
            config().with_max_inside_distance(0.15),
        )
        .unwrap()
        .with_inside_tester(|[i, _, _]: Index3| i < 10);
        let mut grid = DistanceGrid::new(g);
        transform.execute(&mut grid).unwrap();
        assert_eq!(grid.code(9, 10, 10), Some(-10));
        assert_eq!(grid.code(8, 10, 10), Some(INSIDE_SENTINEL));
        assert_eq!(grid.code(13, 10, 10), Some(30));
    }
}
