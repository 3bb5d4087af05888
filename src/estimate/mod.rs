//! Estimation stage: extrapolate total population from a partial
//! detection set.

mod band;
mod density;

use crate::config::{ConfidenceTier, ConfidenceTiers, EstimationConfig, EstimationMethod};
use crate::detect::Detection;
use crate::error::Result;
use crate::pipeline::RegionId;
use crate::segment::Region;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Low/expected/high bounds on a region's population estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    /// Lower bound (never below the detected count).
    pub low: u64,
    /// The expected estimate.
    pub expected: u64,
    /// Upper bound.
    pub high: u64,
}

/// Calibration inputs recorded alongside an estimate for audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationInputs {
    /// Band fraction used (band method).
    pub band_fraction: Option<f32>,
    /// Density constant used (density method).
    pub density_per_megapixel: Option<f32>,
}

/// Per-region population estimate. One per region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimation {
    /// Owning region.
    pub region_id: RegionId,
    /// Method that produced the estimate.
    pub method: EstimationMethod,
    /// Estimated total count; never below `detected_count`.
    pub estimated_count: u64,
    /// Accepted detections the estimate was derived from.
    pub detected_count: u64,
    /// Low/expected/high band.
    pub band: ConfidenceBand,
    /// Calibration inputs used.
    pub calibration: CalibrationInputs,
}

/// Produces one [`Estimation`] per region from its merged detections.
#[derive(Debug, Clone)]
pub struct EstimationStage {
    config: EstimationConfig,
    tiers: ConfidenceTiers,
}

impl EstimationStage {
    /// Create a stage with the given calibration configuration.
    pub fn new(config: EstimationConfig, tiers: ConfidenceTiers) -> Self {
        Self { config, tiers }
    }

    /// Estimate the total population of one region.
    ///
    /// Both methods guarantee the estimate is at least the detected
    /// count: extrapolation covers the detected plants, so the detected
    /// count is the floor of every estimate by definition. The band
    /// spreads in proportion to the share of low-tier detections: a set
    /// dominated by weak scores makes the extrapolation less certain.
    pub fn run(&self, region: &Region, detections: &[Detection]) -> Result<Estimation> {
        let bbox = region.bounding_box()?;
        let detected_count = detections.len() as u64;

        let extrapolated = match self.config.method {
            EstimationMethod::Band => {
                band::extrapolate(&bbox, detections, self.config.band_fraction)
            }
            EstimationMethod::Density => {
                density::extrapolate(&bbox, self.config.density_per_megapixel)?
            }
        };
        let expected = extrapolated.max(detected_count);

        let low_share = if detections.is_empty() {
            0.0
        } else {
            detections
                .iter()
                .filter(|d| self.tiers.classify(d.confidence) == ConfidenceTier::Low)
                .count() as f64
                / detections.len() as f64
        };
        let spread = 1.0 + low_share;

        let low_factor = 1.0 - (1.0 - f64::from(self.config.low_factor)) * spread;
        let high_factor = 1.0 + (f64::from(self.config.high_factor) - 1.0) * spread;
        let low = ((expected as f64) * low_factor.max(0.0)).floor() as u64;
        let high = ((expected as f64) * high_factor).ceil() as u64;
        let band = ConfidenceBand {
            low: low.max(detected_count),
            expected,
            high: high.max(expected),
        };

        debug!(
            region = %region.id,
            method = %self.config.method,
            detected = detected_count,
            estimated = expected,
            "Estimated region population"
        );

        Ok(Estimation {
            region_id: region.id.clone(),
            method: self.config.method,
            estimated_count: expected,
            detected_count,
            band,
            calibration: CalibrationInputs {
                band_fraction: matches!(self.config.method, EstimationMethod::Band)
                    .then_some(self.config.band_fraction),
                density_per_megapixel: matches!(self.config.method, EstimationMethod::Density)
                    .then(|| self.config.density_per_megapixel)
                    .flatten(),
            },
        })
    }
}
