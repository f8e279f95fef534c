use nalgebra::{Point3, Vector3};

/// Real-valued coordinate and distance type, used for the whole distance pipeline.
///
/// Mixing precisions between distance evaluation and quantization could flip codes
/// at encoding boundaries, so every stage works in this one type.
pub type Real = f64;

/// A 3D world-space point with [`Real`] components.
pub type Point = Point3<Real>;

/// A 3D vector with [`Real`] components.
pub type Vector = Vector3<Real>;

/// Integer voxel index `[i, j, k]` inside a grid.
pub type Index3 = [usize; 3];

/// Quantized distance code stored per voxel.
pub type Code = i16;
