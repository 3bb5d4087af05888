//! Application-wide constants.
//!
//! All magic numbers and strings are defined here to ensure consistency
//! and make changes easy to track.

use std::time::Duration;

/// Application name used for config directories and user-facing messages.
pub const APP_NAME: &str = "canopy";

/// Default minimum confidence threshold for detections.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

/// Default minimum confidence for accepting a segmentation region proposal.
pub const DEFAULT_REGION_MIN_CONFIDENCE: f32 = 0.4;

/// Default inference resolution (square) for the segmentation model.
pub const DEFAULT_SEGMENTATION_RESOLUTION: u32 = 1024;

/// Tiling defaults for the detection stage.
pub mod tiling {
    /// Default tile edge length in pixels.
    pub const DEFAULT_TILE_SIZE: u32 = 640;

    /// Default overlap fraction between adjacent tiles on each axis.
    pub const DEFAULT_OVERLAP: f32 = 0.25;

    /// Default merge threshold on intersection-over-smaller-area.
    ///
    /// Containment-based rather than symmetric IoU: boxes split across a
    /// tile boundary produce partials of very different sizes.
    pub const DEFAULT_MERGE_THRESHOLD: f32 = 0.6;

    /// Default luma variance below which a tile is considered
    /// non-informative and skipped.
    pub const DEFAULT_VARIANCE_FLOOR: f64 = 12.0;

    /// Default inference attempts per tile before it is marked degraded.
    pub const DEFAULT_TILE_ATTEMPTS: u32 = 3;
}

/// Estimation defaults.
pub mod estimation {
    /// Default fraction of region height sampled as the calibration band.
    pub const DEFAULT_BAND_FRACTION: f32 = 0.2;

    /// Default low-bound factor applied to the expected estimate.
    pub const DEFAULT_LOW_FACTOR: f32 = 0.9;

    /// Default high-bound factor applied to the expected estimate.
    pub const DEFAULT_HIGH_FACTOR: f32 = 1.15;
}

/// Named confidence tiers consumed wherever classification-by-confidence
/// occurs.
pub mod confidence {
    /// Minimum valid confidence value.
    pub const MIN: f32 = 0.0;
    /// Maximum valid confidence value.
    pub const MAX: f32 = 1.0;
    /// Detections at or above this are high-confidence.
    pub const DEFAULT_HIGH: f32 = 0.8;
    /// Detections at or above this (and below high) are medium-confidence.
    pub const DEFAULT_MEDIUM: f32 = 0.5;
}

/// Model cache defaults.
pub mod model_cache {
    /// Acquisitions after which a cache entry is discarded and lazily
    /// reloaded, bounding accumulated memory fragmentation.
    pub const DEFAULT_EVICT_AFTER_USES: u64 = 200;
}

/// Circuit breaker defaults for the model-serving path.
pub mod breaker {
    use std::time::Duration;

    /// Consecutive failures before the circuit opens.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    /// Cooldown before an open circuit admits a probe.
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

    /// Bounded number of cooldown waits a unit of work tolerates before
    /// giving up with a circuit-open failure.
    pub const MAX_OPEN_WAITS: u32 = 3;
}

/// Retry defaults for child units of work.
pub mod retry {
    use std::time::Duration;

    /// Attempts per child unit before permanent failure.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for exponential backoff.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

    /// Ceiling on a single backoff delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
}

/// Independent timeout applied to each unit of work.
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(120);

/// GPS coordinate bounds.
pub mod gps {
    /// Minimum valid longitude.
    pub const LON_MIN: f64 = -180.0;
    /// Maximum valid longitude.
    pub const LON_MAX: f64 = 180.0;
    /// Minimum valid latitude.
    pub const LAT_MIN: f64 = -90.0;
    /// Maximum valid latitude.
    pub const LAT_MAX: f64 = 90.0;
}

/// Output file extensions by format.
pub mod output_extensions {
    /// CSV report extension.
    pub const CSV: &str = ".canopy.report.csv";
    /// JSON report extension.
    pub const JSON: &str = ".canopy.report.json";
}
