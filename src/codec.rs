//! Fixed-point encoding of real distances into per-voxel [`Code`]s.
//!
//! One code step is `quantization_unit / subvoxel_resolution` world units:
//!
//! ```text
//! code = floor(distance × subvoxel_resolution / quantization_unit + 0.5)
//! ```
//!
//! Rounding is half-up. The encoding is monotonic, so the minimum of two codes is
//! the code of the smaller distance and reductions never need to decode.

use crate::types::{Code, Real};

/// Marks a cell with no point within the outside band.
pub const OUTSIDE_SENTINEL: Code = Code::MAX;

/// Marks an inside cell with no point within the inside band (signed fields only).
pub const INSIDE_SENTINEL: Code = -Code::MAX;

/// Largest code that still denotes a real distance.
pub const MAX_CODE: Code = Code::MAX - 1;

/// Converts between world-space distances and quantized codes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceCodec {
    quantization_unit: Real,
    subvoxel_resolution: u32,
    /// Codes per world unit.
    scale: Real,
}

impl DistanceCodec {
    /// `quantization_unit` must be positive and `subvoxel_resolution` non-zero; both are
    /// validated by the transform before a codec is built.
    pub fn new(quantization_unit: Real, subvoxel_resolution: u32) -> Self {
        Self {
            quantization_unit,
            subvoxel_resolution,
            scale: subvoxel_resolution as Real / quantization_unit,
        }
    }

    pub fn quantization_unit(&self) -> Real {
        self.quantization_unit
    }

    pub fn subvoxel_resolution(&self) -> u32 {
        self.subvoxel_resolution
    }

    /// World-space length of one code step.
    pub fn step(&self) -> Real {
        self.quantization_unit / self.subvoxel_resolution as Real
    }

    /// Encodes a non-negative distance, saturating at [`MAX_CODE`].
    #[inline]
    pub fn encode(&self, distance: Real) -> Code {
        self.encode_clamped(distance, MAX_CODE)
    }

    /// Encodes a non-negative distance, saturating at `limit` (itself at most [`MAX_CODE`]).
    #[inline]
    pub fn encode_clamped(&self, distance: Real, limit: Code) -> Code {
        let steps = round_half_up(distance * self.scale);
        // NaN compares false and lands on 0 through the saturating cast below
        if steps >= limit as Real {
            limit
        } else {
            steps.max(0.) as Code
        }
    }

    /// Largest code whose decoded distance does not exceed `max_distance`.
    ///
    /// Used as the clamp for in-band distances so a code rounded up at the band edge never
    /// decodes past the band. The product `max_distance × scale` can land a hair under an
    /// integer (`0.29 × 100 = 28.999…`), so the estimate is corrected against [`decode`].
    ///
    /// [`decode`]: Self::decode
    pub fn band_limit(&self, max_distance: Real) -> Code {
        let estimate = (max_distance * self.scale).round();
        let mut limit = if estimate >= MAX_CODE as Real {
            MAX_CODE
        } else {
            estimate.max(0.) as Code
        };
        while limit > 0 && self.decode(limit) > max_distance {
            limit -= 1;
        }
        while limit < MAX_CODE && self.decode(limit + 1) <= max_distance {
            limit += 1;
        }
        limit
    }

    /// Decodes a code magnitude into a distance. Sentinels are not special-cased here.
    #[inline]
    pub fn decode(&self, code: Code) -> Real {
        (code as i32).abs() as Real / self.scale
    }

    /// Decodes a cell, returning `None` for either sentinel.
    pub fn decode_cell(&self, code: Code) -> Option<Real> {
        is_in_band(code).then(|| self.decode(code))
    }

    /// Decodes a cell keeping the inside sign, `None` for either sentinel.
    pub fn decode_signed(&self, code: Code) -> Option<Real> {
        is_in_band(code).then(|| code as Real / self.scale)
    }
}

/// `true` unless `code` is one of the sentinels.
#[inline]
pub fn is_in_band(code: Code) -> bool {
    code != OUTSIDE_SENTINEL && code != INSIDE_SENTINEL
}

#[inline]
fn round_half_up(x: Real) -> Real {
    (x + 0.5).floor()
}
