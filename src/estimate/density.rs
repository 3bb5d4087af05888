//! Density-based population extrapolation.
//!
//! Applies a precomputed plants-per-megapixel constant to the region
//! area. The constant comes from site calibration and is required
//! configuration for this method.

use crate::detect::BoundingBox;
use crate::error::{Error, Result};

/// Extrapolate a region's population from a density constant.
///
/// A missing constant is malformed input: the owning unit fails
/// permanently and is never retried.
pub fn extrapolate(bbox: &BoundingBox, density_per_megapixel: Option<f32>) -> Result<u64> {
    let density = density_per_megapixel.ok_or_else(|| Error::MissingCalibration {
        method: "density".to_string(),
        message: "density_per_megapixel is not configured".to_string(),
    })?;

    let area_megapixels = f64::from(bbox.area()) / 1_000_000.0;
    Ok((f64::from(density) * area_megapixels).ceil() as u64)
}
