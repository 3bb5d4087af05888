//! Configuration type definitions.

use crate::constants::{
    DEFAULT_MIN_CONFIDENCE, DEFAULT_REGION_MIN_CONFIDENCE, DEFAULT_SEGMENTATION_RESOLUTION,
    DEFAULT_UNIT_TIMEOUT, breaker, confidence, estimation, model_cache, retry, tiling,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inference model files.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Default settings.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Inference settings.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Tiling settings for the detection stage.
    #[serde(default)]
    pub tiling: TilingConfig,

    /// Estimation calibration settings.
    #[serde(default)]
    pub estimation: EstimationConfig,

    /// Retry policy for child units of work.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker guarding the model-serving path.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Named confidence tiers.
    #[serde(default)]
    pub confidence_tiers: ConfidenceTiers,
}

/// Paths to the two inference models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Region-proposal (segmentation) model.
    pub segmentation: Option<ModelConfig>,

    /// Plant detection model.
    pub detection: Option<ModelConfig>,
}

/// Configuration for a single ONNX model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX model file.
    pub path: PathBuf,

    /// Square input resolution the model expects.
    pub resolution: u32,
}

/// Default analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Minimum confidence threshold for detections.
    pub min_confidence: f32,

    /// Minimum confidence for accepting a region proposal.
    pub region_min_confidence: f32,

    /// Inference resolution for the segmentation pass.
    pub segmentation_resolution: u32,

    /// Output formats.
    pub formats: Vec<OutputFormat>,

    /// Independent timeout per unit of work, in seconds.
    pub unit_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            region_min_confidence: DEFAULT_REGION_MIN_CONFIDENCE,
            segmentation_resolution: DEFAULT_SEGMENTATION_RESOLUTION,
            formats: vec![OutputFormat::Json],
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT.as_secs(),
        }
    }
}

impl DefaultsConfig {
    /// Unit timeout as a [`Duration`].
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }
}

/// Inference device configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceDevice {
    /// Automatically select (GPU if available, else CPU).
    #[default]
    Auto,
    /// Force GPU (CUDA), fall back to CPU with a warning.
    Gpu,
    /// Force CPU inference.
    Cpu,
}

/// Inference settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Device to use for inference.
    pub device: InferenceDevice,

    /// Cache entry eviction threshold, in acquisitions.
    pub evict_after_uses: EvictAfterUses,
}

/// Newtype so the eviction threshold has a serde default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvictAfterUses(pub u64);

impl Default for EvictAfterUses {
    fn default() -> Self {
        Self(model_cache::DEFAULT_EVICT_AFTER_USES)
    }
}

/// Tiling settings for the detection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Tile edge length in pixels.
    pub tile_size: u32,

    /// Overlap fraction between adjacent tiles on each axis.
    pub overlap: f32,

    /// Merge threshold on intersection-over-smaller-area.
    pub merge_threshold: f32,

    /// Luma variance below which a tile is skipped as non-informative.
    pub variance_floor: f64,

    /// Inference attempts per tile before it is marked degraded.
    pub tile_attempts: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: tiling::DEFAULT_TILE_SIZE,
            overlap: tiling::DEFAULT_OVERLAP,
            merge_threshold: tiling::DEFAULT_MERGE_THRESHOLD,
            variance_floor: tiling::DEFAULT_VARIANCE_FLOOR,
            tile_attempts: tiling::DEFAULT_TILE_ATTEMPTS,
        }
    }
}

/// Estimation method selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    /// Extrapolate density from a sampled band to the full region.
    #[default]
    Band,
    /// Apply a precomputed density constant.
    Density,
}

impl std::fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Band => write!(f, "band"),
            Self::Density => write!(f, "density"),
        }
    }
}

impl std::str::FromStr for EstimationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "band" => Ok(Self::Band),
            "density" => Ok(Self::Density),
            other => Err(format!("unknown estimation method: {other}")),
        }
    }
}

/// Estimation calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Method used to extrapolate population from detections.
    pub method: EstimationMethod,

    /// Fraction of region height sampled as the calibration band.
    pub band_fraction: f32,

    /// Expected plants per megapixel of region area, for the density
    /// method. Required when `method = "density"`.
    pub density_per_megapixel: Option<f32>,

    /// Low-bound factor applied to the expected estimate.
    pub low_factor: f32,

    /// High-bound factor applied to the expected estimate.
    pub high_factor: f32,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            method: EstimationMethod::Band,
            band_fraction: estimation::DEFAULT_BAND_FRACTION,
            density_per_megapixel: None,
            low_factor: estimation::DEFAULT_LOW_FACTOR,
            high_factor: estimation::DEFAULT_HIGH_FACTOR,
        }
    }
}

/// Retry policy for child units of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per unit before permanent failure.
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,

    /// Ceiling on a single backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: retry::DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: retry::DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

/// Circuit breaker settings for the model-serving path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Cooldown before an open circuit admits a probe, in seconds.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: breaker::DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: breaker::DEFAULT_COOLDOWN.as_secs(),
        }
    }
}

impl BreakerConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Named confidence tiers, consumed uniformly wherever
/// classification-by-confidence occurs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceTiers {
    /// Scores at or above this are high-confidence.
    pub high: f32,
    /// Scores at or above this (and below `high`) are medium-confidence.
    pub medium: f32,
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self {
            high: confidence::DEFAULT_HIGH,
            medium: confidence::DEFAULT_MEDIUM,
        }
    }
}

/// Classification of a confidence score against the named tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    /// Score at or above the high threshold.
    High,
    /// Score at or above the medium threshold.
    Medium,
    /// Score below the medium threshold.
    Low,
}

impl ConfidenceTiers {
    /// Classify a confidence score.
    pub fn classify(&self, score: f32) -> ConfidenceTier {
        if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// CSV per-region report.
    Csv,
    /// JSON session envelope.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
