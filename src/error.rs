use derive_more::{Display, From};

use crate::types::Real;

pub type Result<T> = core::result::Result<T, SplatError>;

#[derive(Debug, Display, From)]
pub enum SplatError {
    #[display("max distance must be positive and finite, got {_0}")]
    InvalidMaxDistance(Real),
    #[display("max inside distance must be non-negative and finite, got {_0}")]
    InvalidInsideDistance(Real),
    #[display("subvoxel resolution must be at least 1")]
    InvalidSubvoxelResolution,
    #[display("thread count must be at least 1")]
    InvalidThreadCount,
    #[display("slab thickness must be at least 1")]
    InvalidSlabThickness,
    #[display("grid dimensions must be positive, got {_0:?}")]
    InvalidDimensions([usize; 3]),
    #[display("voxel size must be positive and finite, got {_0:?}")]
    InvalidVoxelSize([Real; 3]),
    #[display("axis {axis}: {cells} voxels of size {voxel_size} do not span extent {extent}")]
    GeometryMismatch {
        axis: usize,
        cells: usize,
        voxel_size: Real,
        extent: Real,
    },
    #[display("storage shape {found:?} does not match grid dimensions {expected:?}")]
    StorageShapeMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },
    #[display("cannot fit a grid around an empty point cloud")]
    EmptyPointCloud,
    #[display("{_0} points do not fit a 32-bit nearest-point index")]
    TooManyPoints(usize),
    #[from]
    #[display("failed to build worker pool: {_0}")]
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::ThreadPool(err) => Some(err),
            _ => None,
        }
    }
}
