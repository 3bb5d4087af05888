//! Tiled detection stage: per-tile inference and cross-tile merge.

mod merge;
mod tiling;

pub use merge::merge_detections;
pub use tiling::{Tile, is_informative, tile_grid};

use crate::config::TilingConfig;
use crate::error::{Error, Result};
use crate::imaging;
use crate::inference::{AcceleratorGate, Detector};
use crate::pipeline::{CircuitBreaker, RegionId};
use crate::segment::Region;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
}

impl BoundingBox {
    /// Box area.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Area of the intersection with another box.
    pub fn intersection_area(&self, other: &Self) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    /// Intersection area over the smaller of the two box areas.
    ///
    /// The containment criterion used by the merge: a partial box sitting
    /// inside a full box scores 1.0 regardless of the size mismatch.
    pub fn overlap_over_smaller(&self, other: &Self) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller > 0.0 {
            self.intersection_area(other) / smaller
        } else {
            0.0
        }
    }

    /// Translate by a pixel offset.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }
}

/// A single located plant, in global image coordinates.
///
/// Immutable once persisted; the id is stable across re-delivery so
/// upserts are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Stable id (`{region}/t{tile}/d{n}`).
    pub id: String,
    /// Owning region.
    pub region_id: RegionId,
    /// Bounding box in global image coordinates.
    pub bbox: BoundingBox,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    /// Originating tile, kept for audit.
    pub source_tile: u32,
}

/// Result of running tiled detection over one region.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// Canonical merged detections.
    pub detections: Vec<Detection>,
    /// Candidate count before the merge.
    pub candidates: usize,
    /// Tiles excluded after exhausting inference attempts.
    ///
    /// Non-empty means the owning region is WARNING-eligible.
    pub degraded_tiles: Vec<u32>,
    /// Tiles skipped as non-informative.
    pub tiles_skipped: usize,
    /// Total tiles in the grid.
    pub tiles_total: usize,
}

/// Slices a region into overlapping tiles, runs detection per tile and
/// merges the results into one deduplicated set.
pub struct TiledDetectionStage {
    config: TilingConfig,
    breaker: Arc<CircuitBreaker>,
    gate: Option<Arc<AcceleratorGate>>,
}

impl TiledDetectionStage {
    /// Create a stage with the given tiling configuration.
    ///
    /// `breaker` guards the model-serving path; `gate`, when present,
    /// serializes access to a physical accelerator.
    pub fn new(
        config: TilingConfig,
        breaker: Arc<CircuitBreaker>,
        gate: Option<Arc<AcceleratorGate>>,
    ) -> Self {
        Self {
            config,
            breaker,
            gate,
        }
    }

    /// Run detection over one region of the image.
    ///
    /// A single tile's failure never aborts the region: the tile is
    /// retried up to the configured attempt count, then marked degraded
    /// and excluded. A circuit-open rejection aborts immediately and is
    /// surfaced distinctly so the caller's retry budget is untouched.
    pub fn run(
        &self,
        detector: &dyn Detector,
        image: &RgbImage,
        region: &Region,
        min_confidence: f32,
    ) -> Result<DetectionOutcome> {
        let bbox = region.bounding_box()?;

        let rx = bbox.x1.max(0.0) as u32;
        let ry = bbox.y1.max(0.0) as u32;
        let rw = (bbox.x2.min(image.width() as f32) as u32).saturating_sub(rx);
        let rh = (bbox.y2.min(image.height() as f32) as u32).saturating_sub(ry);

        let tiles = tile_grid(rw, rh, self.config.tile_size, self.config.overlap);
        if tiles.is_empty() {
            // Region degenerates to nothing inside the image; zero
            // detections is a valid result.
            return Ok(DetectionOutcome {
                detections: Vec::new(),
                candidates: 0,
                degraded_tiles: Vec::new(),
                tiles_skipped: 0,
                tiles_total: 0,
            });
        }

        let region_img = imaging::crop(image, rx, ry, rw, rh);
        let tiles_total = tiles.len();
        debug!(
            region = %region.id,
            tiles = tiles_total,
            tile_size = self.config.tile_size,
            overlap = self.config.overlap,
            "Tiling region"
        );

        let mut candidates = Vec::new();
        let mut degraded_tiles = Vec::new();
        let mut tiles_skipped = 0;

        for tile in &tiles {
            let tile_img = imaging::crop(&region_img, tile.x, tile.y, tile.width, tile.height);

            if tiles_total > 1
                && !is_informative(&imaging::to_luma(&tile_img), self.config.variance_floor)
            {
                tiles_skipped += 1;
                continue;
            }

            match self.detect_with_retries(detector, &tile_img, min_confidence, tile.index) {
                Ok(raw) => {
                    let dx = (rx + tile.x) as f32;
                    let dy = (ry + tile.y) as f32;
                    for (n, detection) in raw.into_iter().enumerate() {
                        candidates.push(Detection {
                            id: format!("{}/t{}/d{n}", region.id, tile.index),
                            region_id: region.id.clone(),
                            bbox: detection.bbox.translated(dx, dy),
                            confidence: detection.confidence,
                            source_tile: tile.index,
                        });
                    }
                }
                Err(e @ Error::CircuitOpen { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        region = %region.id,
                        tile = tile.index,
                        error = %e,
                        "Tile degraded after exhausting inference attempts"
                    );
                    degraded_tiles.push(tile.index);
                }
            }
        }

        let candidate_count = candidates.len();
        let detections = merge_detections(candidates, self.config.merge_threshold);
        debug!(
            region = %region.id,
            candidates = candidate_count,
            merged = detections.len(),
            skipped = tiles_skipped,
            degraded = degraded_tiles.len(),
            "Merged tile detections"
        );

        Ok(DetectionOutcome {
            detections,
            candidates: candidate_count,
            degraded_tiles,
            tiles_skipped,
            tiles_total,
        })
    }

    /// Run one tile's inference through the breaker with bounded retries.
    fn detect_with_retries(
        &self,
        detector: &dyn Detector,
        tile_img: &RgbImage,
        min_confidence: f32,
        tile_index: u32,
    ) -> Result<Vec<crate::inference::RawDetection>> {
        let attempts = self.config.tile_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            let result = self.breaker.call(|| {
                let _accelerator = self.gate.as_deref().map(AcceleratorGate::lock);
                detector.detect_tile(tile_img, min_confidence)
            });

            match result {
                Ok(raw) => return Ok(raw),
                Err(e @ Error::CircuitOpen { .. }) => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        debug!(tile = tile_index, attempt, error = %e, "Retrying tile inference");
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Internal {
            message: "tile retry loop produced no error".to_string(),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::inference::RawDetection;
    use crate::pipeline::SessionId;
    use crate::segment::ContainerClass;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn noisy_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 31 + y * 17) % 251) as u8;
            Rgb([v, v.wrapping_add(40), v.wrapping_add(80)])
        })
    }

    fn region(session: &str, w: f32, h: f32) -> Region {
        Region {
            id: RegionId::new(format!("{session}/r0")),
            session_id: SessionId::new(session),
            outline: vec![(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)],
            label: ContainerClass::Tray,
            confidence: 0.9,
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "model-serving",
            BreakerConfig::default(),
        ))
    }

    /// Emits one centered detection per tile it sees.
    struct OnePerTile {
        calls: AtomicU32,
    }

    impl Detector for OnePerTile {
        fn detect_tile(
            &self,
            tile: &RgbImage,
            _min_confidence: f32,
        ) -> Result<Vec<RawDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (w, h) = (tile.width() as f32, tile.height() as f32);
            Ok(vec![RawDetection {
                bbox: BoundingBox {
                    x1: w / 2.0 - 5.0,
                    y1: h / 2.0 - 5.0,
                    x2: w / 2.0 + 5.0,
                    y2: h / 2.0 + 5.0,
                },
                confidence: 0.9,
            }])
        }
    }

    struct FlakyDetector {
        failures_left: AtomicU32,
    }

    impl Detector for FlakyDetector {
        fn detect_tile(
            &self,
            _tile: &RgbImage,
            _min_confidence: f32,
        ) -> Result<Vec<RawDetection>> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Inference {
                    reason: "accelerator busy".to_string(),
                });
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_small_region_single_pass() {
        let config = TilingConfig {
            tile_size: 640,
            ..TilingConfig::default()
        };
        let stage = TiledDetectionStage::new(config, breaker(), None);
        let image = noisy_image(320, 240);
        let detector = OnePerTile {
            calls: AtomicU32::new(0),
        };

        let outcome = stage
            .run(&detector, &image, &region("s1", 320.0, 240.0), 0.25)
            .unwrap();

        assert_eq!(outcome.tiles_total, 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.detections.len(), 1);
    }

    #[test]
    fn test_detections_translated_to_global_coordinates() {
        let config = TilingConfig {
            tile_size: 100,
            overlap: 0.0,
            variance_floor: 0.0,
            ..TilingConfig::default()
        };
        let stage = TiledDetectionStage::new(config, breaker(), None);
        let image = noisy_image(200, 100);
        let detector = OnePerTile {
            calls: AtomicU32::new(0),
        };

        let outcome = stage
            .run(&detector, &image, &region("s2", 200.0, 100.0), 0.25)
            .unwrap();

        assert_eq!(outcome.tiles_total, 2);
        // Second tile's centered detection lands at global x ~145.
        assert!(
            outcome
                .detections
                .iter()
                .any(|d| d.bbox.x1 > 100.0 && d.source_tile == 1)
        );
    }

    #[test]
    fn test_failed_tile_is_degraded_not_fatal() {
        let config = TilingConfig {
            tile_size: 100,
            overlap: 0.0,
            variance_floor: 0.0,
            tile_attempts: 2,
            ..TilingConfig::default()
        };
        let stage = TiledDetectionStage::new(config, breaker(), None);
        let image = noisy_image(200, 100);
        // Enough failures to exhaust one tile's attempts, then recover.
        let detector = FlakyDetector {
            failures_left: AtomicU32::new(2),
        };

        let outcome = stage
            .run(&detector, &image, &region("s3", 200.0, 100.0), 0.25)
            .unwrap();

        assert_eq!(outcome.degraded_tiles, vec![0]);
        assert_eq!(outcome.tiles_total, 2);
    }

    #[test]
    fn test_uniform_tiles_are_skipped() {
        let config = TilingConfig {
            tile_size: 100,
            overlap: 0.0,
            variance_floor: 5.0,
            ..TilingConfig::default()
        };
        let stage = TiledDetectionStage::new(config, breaker(), None);
        // Completely flat image: every tile is non-informative.
        let image = RgbImage::from_pixel(200, 100, Rgb([90, 90, 90]));
        let detector = OnePerTile {
            calls: AtomicU32::new(0),
        };

        let outcome = stage
            .run(&detector, &image, &region("s4", 200.0, 100.0), 0.25)
            .unwrap();

        assert_eq!(outcome.tiles_skipped, 2);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.detections.is_empty());
    }
}
