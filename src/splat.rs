//! Work scheduling for the point splat: influence boxes and slab ownership.
//!
//! The grid is cut along X into slabs of `thickness` index planes:
//!
//! ```text
//!   x:  0 1 2 3 | 4 5 6 7 | 8 9 10 11 | 12 13
//!       slab 0  | slab 1  |  slab 2   | slab 3
//! ```
//!
//! Every influence box is registered with each slab its X range touches. A slab is
//! processed by exactly one worker, so no cell is ever written by two threads.

use crate::{
    geometry::GridGeometry,
    point_cloud::PointCloud,
    types::{Index3, Point, Real},
};

/// Voxel-index box of one point's influence sphere, clipped to the grid.
///
/// `min` is inclusive and `max` exclusive on every axis, and the box is never empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfluenceBox {
    /// Index of the point in its cloud.
    pub point: usize,
    pub min: Index3,
    pub max: Index3,
}

impl InfluenceBox {
    pub fn cell_count(&self) -> usize {
        (0..3).map(|axis| self.max[axis] - self.min[axis]).product()
    }
}

/// Per-axis margin, in voxels, that covers a sphere of `radius`.
pub fn influence_margin(geometry: &GridGeometry, radius: Real) -> [i64; 3] {
    let vs = geometry.voxel_size();
    [
        (radius / vs.x).ceil() as i64,
        (radius / vs.y).ceil() as i64,
        (radius / vs.z).ceil() as i64,
    ]
}

/// Computes the clipped influence box of `p`, or `None` if it misses the grid.
///
/// Non-finite points never influence anything.
pub fn influence_box(
    geometry: &GridGeometry,
    point: usize,
    p: &Point,
    margin: [i64; 3],
) -> Option<InfluenceBox> {
    if !p.iter().all(|c| c.is_finite()) {
        return None;
    }

    let center = geometry.world_to_grid(p);
    let dims = geometry.dimensions();
    let mut min = [0usize; 3];
    let mut max = [0usize; 3];
    for axis in 0..3 {
        let lo = center[axis].saturating_sub(margin[axis]).max(0);
        let hi = center[axis]
            .saturating_add(margin[axis])
            .saturating_add(1)
            .min(dims[axis] as i64);
        if lo >= hi {
            return None;
        }
        min[axis] = lo as usize;
        max[axis] = hi as usize;
    }

    Some(InfluenceBox { point, min, max })
}

/// Influence boxes of a whole cloud, in cloud order, plus how many points were culled.
pub fn collect_influence_boxes(
    geometry: &GridGeometry,
    cloud: &PointCloud,
    radius: Real,
) -> (Vec<InfluenceBox>, usize) {
    let margin = influence_margin(geometry, radius);
    let boxes: Vec<InfluenceBox> = cloud
        .iter()
        .enumerate()
        .filter_map(|(index, p)| influence_box(geometry, index, p, margin))
        .collect();
    let culled = cloud.len() - boxes.len();
    (boxes, culled)
}

/// Assignment of influence boxes to the X slabs that own the cells they cover.
#[derive(Clone, Debug)]
pub struct SlabPlan {
    thickness: usize,
    /// For each slab, indices into the box list, ascending.
    slabs: Vec<Vec<usize>>,
}

impl SlabPlan {
    /// `thickness` must be at least one; `nx` is the grid's X dimension.
    pub fn new(nx: usize, thickness: usize, boxes: &[InfluenceBox]) -> Self {
        let slab_count = nx.div_ceil(thickness);
        let mut slabs = vec![Vec::new(); slab_count];
        for (b, influence) in boxes.iter().enumerate() {
            let first = influence.min[0] / thickness;
            let last = (influence.max[0] - 1) / thickness;
            for slab in &mut slabs[first..=last] {
                slab.push(b);
            }
        }
        Self { thickness, slabs }
    }

    pub fn thickness(&self) -> usize {
        self.thickness
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Indices of the boxes overlapping slab `slab`.
    pub fn boxes_in(&self, slab: usize) -> &[usize] {
        &self.slabs[slab]
    }

    /// First X index owned by slab `slab`.
    pub fn x_offset(&self, slab: usize) -> usize {
        slab * self.thickness
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn geometry() -> GridGeometry {
        GridGeometry::from_origin(Point::new(-1., -1., -1.), [20, 20, 20], 0.1).unwrap()
    }

    #[test]
    fn box_covers_sphere_and_is_clipped() {
        let g = geometry();
        let margin = influence_margin(&g, 0.25);
        assert_eq!(margin, [3, 3, 3]);

        let inner = influence_box(&g, 0, &Point::origin(), margin).unwrap();
        assert_eq!(inner.min, [7, 7, 7]);
        assert_eq!(inner.max, [14, 14, 14]);
        assert_eq!(inner.cell_count(), 343);

        let corner = influence_box(&g, 1, &Point::new(-0.99, -0.99, 0.95), margin).unwrap();
        assert_eq!(corner.min, [0, 0, 16]);
        assert_eq!(corner.max, [4, 4, 20]);
    }

    #[test]
    fn points_outside_the_reach_are_culled() {
        let g = geometry();
        let margin = influence_margin(&g, 0.25);
        assert!(influence_box(&g, 0, &Point::new(5., 0., 0.), margin).is_none());
        assert!(influence_box(&g, 0, &Point::new(0., -1.5, 0.), margin).is_none());
        assert!(influence_box(&g, 0, &Point::new(Real::NAN, 0., 0.), margin).is_none());
        assert!(influence_box(&g, 0, &Point::new(Real::INFINITY, 0., 0.), margin).is_none());
        // just outside the grid but within reach of its edge
        assert!(influence_box(&g, 0, &Point::new(-1.2, 0., 0.), margin).is_some());
    }

    #[test]
    fn far_away_coordinates_do_not_overflow() {
        let g = geometry();
        let margin = influence_margin(&g, 0.25);
        assert!(influence_box(&g, 0, &Point::new(1e300, 0., 0.), margin).is_none());
        assert!(influence_box(&g, 0, &Point::new(-1e300, 0., 0.), margin).is_none());
    }

    #[test]
    fn collect_counts_culled_points() {
        let g = geometry();
        let cloud: PointCloud = [
            Point::origin(),
            Point::new(9., 9., 9.),
            Point::new(0.5, 0.5, 0.5),
        ]
        .into_iter()
        .collect();
        let (boxes, culled) = collect_influence_boxes(&g, &cloud, 0.2);
        assert_eq!(culled, 1);
        assert_eq!(boxes.iter().map(|b| b.point).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn slab_plan_registers_boxes_with_every_touched_slab() {
        let boxes = [
            InfluenceBox {
                point: 0,
                min: [0, 0, 0],
                max: [3, 1, 1],
            },
            InfluenceBox {
                point: 1,
                min: [3, 0, 0],
                max: [9, 1, 1],
            },
            InfluenceBox {
                point: 2,
                min: [9, 0, 0],
                max: [10, 1, 1],
            },
        ];
        let plan = SlabPlan::new(10, 4, &boxes);
        assert_eq!(plan.slab_count(), 3);
        assert_eq!(plan.boxes_in(0), &[0, 1]);
        assert_eq!(plan.boxes_in(1), &[1]);
        assert_eq!(plan.boxes_in(2), &[1, 2]);
        assert_eq!(plan.x_offset(2), 8);
    }
}
