pub mod codec;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod plugin;
pub mod point_cloud;
pub mod splat;
pub mod transform;
pub mod types;

pub use error::{Result, SplatError};
pub use geometry::{Bounds, GridGeometry};
pub use grid::DistanceGrid;
pub use plugin::DistanceFieldPlugin;
pub use point_cloud::PointCloud;
pub use transform::{DistanceToPointSet, DistanceTransformConfig, InsideTester, SplatStats};
