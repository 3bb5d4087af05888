//! End-to-end orchestration tests over mock models and in-memory
//! collaborators.

#![allow(clippy::unwrap_used)]

use canopy::config::{BreakerConfig, Config, RetryConfig, TilingConfig};
use canopy::detect::BoundingBox;
use canopy::error::{Error, Result};
use canopy::estimate::{CalibrationInputs, ConfidenceBand, Estimation};
use canopy::inference::{
    Detector, LoadedModel, ModelKind, ModelLoader, RawDetection, Segmenter,
};
use canopy::pipeline::{
    CancelFlag, FailureKind, Orchestrator, RegionId, RegionOutcome, RegionSuccess, SessionId,
    SessionRequest, SessionStatus,
};
use canopy::segment::{ContainerClass, RegionProposal};
use canopy::spatial::{GpsPoint, HierarchyLevel, NodeId, SpatialHierarchy, SpatialNode};
use canopy::store::{BlobRole, BlobStore, InMemoryBlobStore, InMemoryRecordStore, RecordStore};
use geo::{LineString, Polygon};
use image::{Rgb, RgbImage};
use std::sync::Arc;

/// Proposes the left and right halves of the image as two regions.
struct HalfSegmenter;

impl Segmenter for HalfSegmenter {
    fn propose_regions(
        &self,
        image: &RgbImage,
        _min_confidence: f32,
        _resolution: u32,
    ) -> Result<Vec<RegionProposal>> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let half = w / 2.0;
        Ok(vec![
            RegionProposal {
                outline: vec![(0.0, 0.0), (half, 0.0), (half, h), (0.0, h)],
                label: ContainerClass::Tray,
                confidence: 0.9,
            },
            RegionProposal {
                outline: vec![(half, 0.0), (w, 0.0), (w, h), (half, h)],
                label: ContainerClass::Pot,
                confidence: 0.8,
            },
        ])
    }
}

/// Fails on red-dominant tiles; elsewhere emits a grid of boxes with a
/// lower-confidence near-duplicate so the merge has something to suppress.
struct BrightnessDetector;

impl Detector for BrightnessDetector {
    fn detect_tile(&self, tile: &RgbImage, _min_confidence: f32) -> Result<Vec<RawDetection>> {
        let pixels = tile.pixels().count() as f64;
        let red_mean =
            tile.pixels().map(|p| f64::from(p[0])).sum::<f64>() / pixels.max(1.0);
        if red_mean > 200.0 {
            return Err(Error::Inference {
                reason: "accelerator busy".to_string(),
            });
        }

        let mut detections = Vec::new();
        let mut y = 4.0;
        while y + 8.0 < tile.height() as f32 {
            let mut x = 4.0;
            while x + 8.0 < tile.width() as f32 {
                detections.push(RawDetection {
                    bbox: BoundingBox {
                        x1: x,
                        y1: y,
                        x2: x + 8.0,
                        y2: y + 8.0,
                    },
                    confidence: 0.9,
                });
                // Near-duplicate that the containment merge must remove.
                detections.push(RawDetection {
                    bbox: BoundingBox {
                        x1: x + 1.0,
                        y1: y + 1.0,
                        x2: x + 8.0,
                        y2: y + 8.0,
                    },
                    confidence: 0.6,
                });
                x += 16.0;
            }
            y += 16.0;
        }
        Ok(detections)
    }
}

struct MockLoader;

impl ModelLoader for MockLoader {
    fn load(&self, kind: ModelKind) -> Result<LoadedModel> {
        Ok(match kind {
            ModelKind::Segmentation => LoadedModel::Segmentation(Box::new(HalfSegmenter)),
            ModelKind::Detection => LoadedModel::Detection(Box::new(BrightnessDetector)),
        })
    }
}

/// Segmenter that proposes nothing.
struct EmptySegmenter;

impl Segmenter for EmptySegmenter {
    fn propose_regions(
        &self,
        _image: &RgbImage,
        _min_confidence: f32,
        _resolution: u32,
    ) -> Result<Vec<RegionProposal>> {
        Ok(Vec::new())
    }
}

struct EmptyLoader;

impl ModelLoader for EmptyLoader {
    fn load(&self, kind: ModelKind) -> Result<LoadedModel> {
        Ok(match kind {
            ModelKind::Segmentation => LoadedModel::Segmentation(Box::new(EmptySegmenter)),
            ModelKind::Detection => LoadedModel::Detection(Box::new(BrightnessDetector)),
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.tiling = TilingConfig {
        tile_size: 64,
        overlap: 0.25,
        merge_threshold: 0.6,
        variance_floor: 0.0,
        tile_attempts: 2,
    };
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
    };
    // Keep the breaker out of the way: these tests exercise per-tile
    // degradation, not circuit trips.
    config.breaker = BreakerConfig {
        failure_threshold: 10_000,
        cooldown_secs: 1,
    };
    config
}

/// Left half green noise (detectable), right half red-dominant (fails).
fn split_image() -> Vec<u8> {
    let image = RgbImage::from_fn(256, 128, |x, y| {
        let noise = ((x * 13 + y * 37) % 97) as u8;
        if x < 128 {
            Rgb([40, 120 + noise / 2, noise])
        } else {
            Rgb([230, noise, noise / 2])
        }
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    bytes
}

async fn store_image(
    blob: &InMemoryBlobStore,
    session: &SessionId,
    bytes: Vec<u8>,
) -> canopy::store::BlobRef {
    blob.put(session, BlobRole::Original, bytes).await.unwrap()
}

fn square(cx: f64, cy: f64, half: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (cx - half, cy - half),
            (cx + half, cy - half),
            (cx + half, cy + half),
            (cx - half, cy + half),
        ]),
        Vec::new(),
    )
}

fn mendoza_hierarchy() -> SpatialHierarchy {
    let mut hierarchy = SpatialHierarchy::new();
    hierarchy
        .insert(SpatialNode {
            id: NodeId::new("w1"),
            level: HierarchyLevel::Warehouse,
            polygon: square(-68.7, -33.0, 0.5),
            parent: None,
        })
        .unwrap();
    hierarchy
        .insert(SpatialNode {
            id: NodeId::new("a1"),
            level: HierarchyLevel::Area,
            polygon: square(-68.7, -33.04, 0.1),
            parent: Some(NodeId::new("w1")),
        })
        .unwrap();
    hierarchy
        .insert(SpatialNode {
            id: NodeId::new("l1"),
            level: HierarchyLevel::Location,
            polygon: square(-68.701, -33.043, 0.01),
            parent: Some(NodeId::new("a1")),
        })
        .unwrap();
    hierarchy
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_failure_yields_warning_with_partial_totals() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let session_id = SessionId::new("lot-7");
    let image = store_image(&blob, &session_id, split_image()).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id: session_id.clone(),
            image,
            gps: None,
            cancel: CancelFlag::new(),
        })
        .await
        .unwrap();

    // Region 0 (left, green) succeeds; region 1 (right, red) exhausts
    // every tile attempt, degrading all its tiles. Its unit still
    // resolves, so the session is a partial, explicitly flagged result.
    assert_eq!(session.status, SessionStatus::Warning);
    assert_eq!(session.totals.regions, 2);
    assert!(session.totals.detected > 0);
    assert!(session.totals.estimated >= session.totals.detected);
    assert!(!session.reasons.is_empty());

    // The merge suppressed the low-confidence near-duplicates.
    let estimations = records.estimations_for_session(&session_id).await.unwrap();
    assert!(!estimations.is_empty());
    for estimation in &estimations {
        assert!(estimation.estimated_count >= estimation.detected_count);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reprocessing_is_idempotent_over_stable_ids() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let session_id = SessionId::new("lot-8");
    let image = store_image(&blob, &session_id, split_image()).await;
    let request = SessionRequest {
        session_id: session_id.clone(),
        image,
        gps: None,
        cancel: CancelFlag::new(),
    };

    let first = orchestrator.process_session(request.clone()).await.unwrap();
    let regions_after_first = records.region_count();
    let detections_after_first = records.detection_count();

    // At-least-once delivery: the same session processed again upserts
    // the same stable ids and creates no duplicates.
    let second = orchestrator.process_session(request).await.unwrap();
    assert_eq!(records.region_count(), regions_after_first);
    assert_eq!(records.detection_count(), detections_after_first);
    assert_eq!(first.totals, second.totals);
    assert_eq!(first.status, second.status);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_regions_completes_with_zero_counts() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(EmptyLoader),
    );

    let session_id = SessionId::new("lot-9");
    let image = store_image(&blob, &session_id, split_image()).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id,
            image,
            gps: None,
            cancel: CancelFlag::new(),
        })
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.totals.detected, 0);
    assert_eq!(session.totals.estimated, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_image_fails_without_retry() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let session_id = SessionId::new("lot-10");
    let image = store_image(&blob, &session_id, vec![0xDE, 0xAD, 0xBE, 0xEF]).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id,
            image,
            gps: None,
            cancel: CancelFlag::new(),
        })
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.reasons.len(), 1);
    assert_eq!(session.reasons[0].kind, FailureKind::MalformedInput);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_session_discards_child_results() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let cancel = CancelFlag::new();
    cancel.request();

    let session_id = SessionId::new("lot-11");
    let image = store_image(&blob, &session_id, split_image()).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id,
            image,
            gps: None,
            cancel,
        })
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.totals.detected, 0);
    assert_eq!(session.totals.estimated, 0);
    assert_eq!(session.reasons[0].kind, FailureKind::Cancelled);
    // Child results were discarded, not persisted.
    assert_eq!(records.detection_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn gps_point_attaches_most_specific_location() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    )
    .with_hierarchy(Arc::new(mendoza_hierarchy()));

    let session_id = SessionId::new("lot-12");
    let image = store_image(&blob, &session_id, split_image()).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id,
            image,
            gps: Some(GpsPoint {
                longitude: -68.701,
                latitude: -33.043,
            }),
            cancel: CancelFlag::new(),
        })
        .await
        .unwrap();

    assert_eq!(session.location, Some(NodeId::new("l1")));
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolvable_gps_point_is_not_fatal() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    )
    .with_hierarchy(Arc::new(mendoza_hierarchy()));

    let session_id = SessionId::new("lot-13");
    let image = store_image(&blob, &session_id, split_image()).await;
    let session = orchestrator
        .process_session(SessionRequest {
            session_id,
            image,
            gps: Some(GpsPoint {
                longitude: 2.35,
                latitude: 48.85,
            }),
            cancel: CancelFlag::new(),
        })
        .await
        .unwrap();

    // "No location resolved" is an explicit outcome; processing proceeds.
    assert_eq!(session.location, None);
    assert_ne!(session.status, SessionStatus::Pending);
}

#[test]
fn finalize_callback_is_idempotent() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let session_id = SessionId::new("lot-14");
    let mut session = canopy::pipeline::ProcessingSession::new(
        session_id.clone(),
        canopy::store::BlobRef::new("mem:lot-14/original/0"),
    );
    session.status = SessionStatus::Processing;

    let success = |region: &str, detected: u64, estimated: u64| RegionOutcome {
        region_id: RegionId::new(region),
        attempts: 1,
        result: Ok(RegionSuccess {
            estimation: Estimation {
                region_id: RegionId::new(region),
                method: canopy::config::EstimationMethod::Band,
                estimated_count: estimated,
                detected_count: detected,
                band: ConfidenceBand {
                    low: detected,
                    expected: estimated,
                    high: estimated + 50,
                },
                calibration: CalibrationInputs {
                    band_fraction: Some(0.2),
                    density_per_megapixel: None,
                },
            },
            detections: Vec::new(),
            degraded_tiles: Vec::new(),
        }),
    };
    let failure = RegionOutcome {
        region_id: RegionId::new("lot-14/r1"),
        attempts: 3,
        result: Err(canopy::pipeline::FailureReason {
            region_id: Some(RegionId::new("lot-14/r1")),
            kind: FailureKind::Transient,
            message: "inference failed: accelerator busy".to_string(),
        }),
    };

    // Region A merged 500 candidates down to 480 and estimated 520;
    // region B exhausted its retries.
    let outcomes = vec![success("lot-14/r0", 480, 520), failure];

    let first = orchestrator.finalize_session(&session, &outcomes, false);
    let second = orchestrator.finalize_session(&session, &outcomes, false);

    assert_eq!(first.status, SessionStatus::Warning);
    assert_eq!(first.totals.detected, 480);
    assert_eq!(first.totals.estimated, 520);
    assert_eq!(first.totals.regions_failed, 1);

    // At-least-once callback delivery: same outcomes, same result, no
    // double counting.
    assert_eq!(first.totals, second.totals);
    assert_eq!(first.status, second.status);
    assert_eq!(first.reasons.len(), second.reasons.len());
}

#[test]
fn finalize_marks_all_failed_as_failed() {
    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::clone(&blob),
        Arc::clone(&records),
        Arc::new(MockLoader),
    );

    let session = canopy::pipeline::ProcessingSession::new(
        SessionId::new("lot-15"),
        canopy::store::BlobRef::new("mem:lot-15/original/0"),
    );
    let failure = |region: &str| RegionOutcome {
        region_id: RegionId::new(region),
        attempts: 3,
        result: Err(canopy::pipeline::FailureReason {
            region_id: Some(RegionId::new(region)),
            kind: FailureKind::Timeout,
            message: "region-analysis timed out after 120s".to_string(),
        }),
    };

    let finalized = orchestrator.finalize_session(
        &session,
        &[failure("lot-15/r0"), failure("lot-15/r1")],
        false,
    );
    assert_eq!(finalized.status, SessionStatus::Failed);
    assert_eq!(finalized.totals.regions_failed, 2);
    assert_eq!(finalized.totals.estimated, 0);
}
