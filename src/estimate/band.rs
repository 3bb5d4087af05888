//! Band-based population extrapolation.
//!
//! The region is divided into horizontal strips of `band_fraction` of its
//! height; the best-sampled strip (the one containing the most detection
//! centers) acts as the calibration band. Its observed density is
//! extrapolated to the full region area.

use crate::detect::{BoundingBox, Detection};

/// Extrapolate a region's population from a sampled band.
///
/// Returns 0 for an empty detection set; the caller clamps the final
/// estimate to the detected count.
pub fn extrapolate(bbox: &BoundingBox, detections: &[Detection], band_fraction: f32) -> u64 {
    if detections.is_empty() {
        return 0;
    }

    let height = bbox.y2 - bbox.y1;
    let width = bbox.x2 - bbox.x1;
    if height <= 0.0 || width <= 0.0 {
        return detections.len() as u64;
    }

    let band_height = (height * band_fraction.clamp(f32::EPSILON, 1.0)).max(1.0);
    let strips = (height / band_height).ceil().max(1.0) as usize;

    // Count detection centers per strip; the fullest strip is the
    // calibration band.
    let mut counts = vec![0_u64; strips];
    for detection in detections {
        let cy = (detection.bbox.y1 + detection.bbox.y2) / 2.0;
        let strip = (((cy - bbox.y1) / band_height).floor() as usize).min(strips - 1);
        counts[strip] += 1;
    }

    let best = counts.iter().copied().max().unwrap_or(0);
    if best == 0 {
        return detections.len() as u64;
    }

    let band_area = f64::from(width) * f64::from(band_height);
    let region_area = f64::from(width) * f64::from(height);
    let density = best as f64 / band_area;

    (density * region_area).round() as u64
}
