//! Session orchestration: segment, fan out per-region child units, join,
//! aggregate.

use crate::config::{Config, InferenceDevice};
use crate::error::{Error, Result};
use crate::imaging;
use crate::inference::{AcceleratorGate, ModelCache, ModelKind, ModelLoader, WorkerId};
use crate::pipeline::worker::{RegionOutcome, WorkerContext, run_region_unit, run_with_retries};
use crate::pipeline::{
    CancelFlag, CircuitBreaker, FailureKind, FailureReason, ProcessingSession, RetryPolicy,
    SessionId, SessionStatus, SessionTotals, TaskMessage,
};
use crate::segment::{Region, SegmentationStage};
use crate::spatial::{GpsPoint, SpatialHierarchy, resolve};
use crate::store::{BlobRef, BlobStore, RecordStore};
use chrono::Utc;
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// A request to process one accepted photo.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Session identifier supplied by the external trigger.
    pub session_id: SessionId,
    /// Reference to the original image blob.
    pub image: BlobRef,
    /// GPS point attached to the photo, if any.
    pub gps: Option<GpsPoint>,
    /// Cooperative cancellation flag for this session.
    pub cancel: CancelFlag,
}

/// Explicit fan-in join: a counter of expected vs. completed children.
///
/// The aggregation callback fires only once `completed == expected`,
/// guarded by an atomic increment. An explicit join, never best-effort.
struct FanIn {
    expected: usize,
    completed: AtomicUsize,
    outcomes: Mutex<Vec<RegionOutcome>>,
    notify: Notify,
}

impl FanIn {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: AtomicUsize::new(0),
            outcomes: Mutex::new(Vec::with_capacity(expected)),
            notify: Notify::new(),
        }
    }

    /// Record one child's terminal outcome.
    fn record(&self, outcome: RegionOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
        if self.completed.fetch_add(1, Ordering::SeqCst) + 1 == self.expected {
            self.notify.notify_one();
        }
    }

    /// Wait until every dispatched child has terminally resolved.
    async fn joined(&self) {
        if self.completed.load(Ordering::SeqCst) >= self.expected {
            return;
        }
        self.notify.notified().await;
    }

    /// Outcomes in deterministic (region id) order.
    fn take_outcomes(&self) -> Vec<RegionOutcome> {
        let mut outcomes = std::mem::take(
            &mut *self.outcomes.lock().unwrap_or_else(PoisonError::into_inner),
        );
        outcomes.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        outcomes
    }
}

/// Coordinates one session's segment → detect → estimate → aggregate
/// pipeline across independent child units.
pub struct Orchestrator<B, R> {
    blob: Arc<B>,
    records: Arc<R>,
    cache: Arc<ModelCache>,
    breaker: Arc<CircuitBreaker>,
    gate: Option<Arc<AcceleratorGate>>,
    hierarchy: Option<Arc<SpatialHierarchy>>,
    config: Config,
    retry: RetryPolicy,
}

impl<B: BlobStore, R: RecordStore> Orchestrator<B, R> {
    /// Build an orchestrator over the given collaborators.
    ///
    /// The model cache is an explicit object handed to each unit of work;
    /// there is no ambient process-global lookup.
    pub fn new(
        config: Config,
        blob: Arc<B>,
        records: Arc<R>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        let cache = Arc::new(ModelCache::new(
            loader,
            config.inference.evict_after_uses.0,
        ));
        let breaker = Arc::new(CircuitBreaker::new("model-serving", config.breaker.clone()));
        let gate = (config.inference.device != InferenceDevice::Cpu)
            .then(|| Arc::new(AcceleratorGate::new()));
        let retry = RetryPolicy::from_config(&config.retry);

        Self {
            blob,
            records,
            cache,
            breaker,
            gate,
            hierarchy: None,
            config,
            retry,
        }
    }

    /// Attach a spatial hierarchy snapshot for location resolution.
    pub fn with_hierarchy(mut self, hierarchy: Arc<SpatialHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// The model cache handed to units of work.
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Process one session to a terminal status.
    ///
    /// Per-unit failures never abort sibling units; only the fan-in
    /// callback decides the session-level status from the full set of
    /// outcomes.
    pub async fn process_session(&self, request: SessionRequest) -> Result<ProcessingSession> {
        let mut session =
            ProcessingSession::new(request.session_id.clone(), request.image.clone());
        session.status = SessionStatus::Processing;

        // Resolve the location once, early, before any processing.
        if let Some(gps) = request.gps {
            match self.resolve_location(&gps) {
                Ok(Some(node_id)) => {
                    info!(session = %session.id, location = %node_id, "Location resolved");
                    session.location = Some(node_id);
                }
                Ok(None) => {
                    // A reported outcome, not a failure: the session
                    // proceeds without a location.
                    warn!(session = %session.id, point = %gps, "No location resolved");
                }
                Err(e) => return self.fail_session(session, &e).await,
            }
        }
        self.records.upsert_session(&session).await?;

        // Fetch and decode; canonical bytes live no longer than this
        // stage.
        let image = {
            let bytes = match self.blob.get(&request.image).await {
                Ok(bytes) => bytes,
                Err(e) => return self.fail_session(session, &e).await,
            };
            match imaging::decode_image(&bytes) {
                Ok(image) => Arc::new(image),
                Err(e) => return self.fail_session(session, &e).await,
            }
        };

        let regions = match self.run_segmentation(&request.session_id, &image).await {
            Ok(regions) => regions,
            Err(e) => return self.fail_session(session, &e).await,
        };
        for region in &regions {
            self.records.upsert_region(region).await?;
        }

        let expected = regions.len();
        session.totals.regions = expected as u32;
        if expected == 0 {
            info!(session = %session.id, "No regions proposed; session complete with zero counts");
            let finalized = self.finalize_session(&session, &[], request.cancel.is_cancelled());
            self.records.upsert_session(&finalized).await?;
            return Ok(finalized);
        }

        // Fan out one independent child unit per region.
        info!(session = %session.id, children = expected, "Dispatching region units");
        let fan_in = Arc::new(FanIn::new(expected));
        for (index, region) in regions.into_iter().enumerate() {
            self.dispatch_region_unit(index, region, &image, &fan_in, &request.cancel);
        }

        // Explicit join, then the aggregation callback.
        fan_in.joined().await;
        let outcomes = fan_in.take_outcomes();
        let finalized = self.finalize_session(&session, &outcomes, request.cancel.is_cancelled());
        self.records.upsert_session(&finalized).await?;

        info!(
            session = %finalized.id,
            status = %finalized.status,
            detected = finalized.totals.detected,
            estimated = finalized.totals.estimated,
            failed_regions = finalized.totals.regions_failed,
            "Session finalized"
        );
        Ok(finalized)
    }

    /// Spawn one region-analysis child unit.
    fn dispatch_region_unit(
        &self,
        index: usize,
        region: Region,
        image: &Arc<RgbImage>,
        fan_in: &Arc<FanIn>,
        cancel: &CancelFlag,
    ) {
        let ctx = WorkerContext {
            // Worker 0 is the segmentation unit; children start at 1.
            worker: WorkerId(index + 1),
            cache: Arc::clone(&self.cache),
            breaker: Arc::clone(&self.breaker),
            gate: self.gate.clone(),
            tiling: self.config.tiling.clone(),
            estimation: self.config.estimation.clone(),
            tiers: self.config.confidence_tiers,
            retry: self.retry,
            min_confidence: self.config.defaults.min_confidence,
            unit_timeout: self.config.defaults.unit_timeout(),
        };
        let message = TaskMessage::region_analysis(region.session_id.clone(), region);
        let image = Arc::clone(image);
        let records = Arc::clone(&self.records);
        let fan_in = Arc::clone(fan_in);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let outcome = run_region_unit(ctx, image, message).await;

            // A cancelled session's results are discarded, not persisted.
            if !cancel.is_cancelled()
                && let Ok(success) = &outcome.result
            {
                if let Err(e) = records.upsert_detections(&success.detections).await {
                    warn!(region = %outcome.region_id, error = %e, "Failed to persist detections");
                }
                if let Err(e) = records.upsert_estimation(&success.estimation).await {
                    warn!(region = %outcome.region_id, error = %e, "Failed to persist estimation");
                }
            }

            fan_in.record(outcome);
        });
    }

    /// Run the segmentation unit with the standard retry/timeout envelope.
    async fn run_segmentation(
        &self,
        session_id: &SessionId,
        image: &Arc<RgbImage>,
    ) -> Result<Vec<Region>> {
        let stage = SegmentationStage::new(
            self.config.defaults.region_min_confidence,
            self.config.defaults.segmentation_resolution,
        );

        let (attempts, result) = run_with_retries(
            "segmentation",
            self.retry,
            self.config.defaults.unit_timeout(),
            &self.breaker,
            || {
                let stage = stage.clone();
                let cache = Arc::clone(&self.cache);
                let breaker = Arc::clone(&self.breaker);
                let gate = self.gate.clone();
                let image = Arc::clone(image);
                let session_id = session_id.clone();
                tokio::task::spawn_blocking(move || {
                    let model = cache.acquire(WorkerId(0), ModelKind::Segmentation)?;
                    let segmenter = model.as_segmenter()?;
                    breaker.call(|| {
                        let _accelerator = gate.as_deref().map(AcceleratorGate::lock);
                        stage.run(segmenter, &image, &session_id)
                    })
                })
            },
        )
        .await;

        debug!(session = %session_id, attempts, "Segmentation unit resolved");
        result
    }

    /// Resolve a GPS point against the configured hierarchy.
    fn resolve_location(&self, gps: &GpsPoint) -> Result<Option<crate::spatial::NodeId>> {
        match &self.hierarchy {
            Some(hierarchy) => Ok(resolve(hierarchy, gps)?.map(|node| node.id.clone())),
            None => {
                debug!("No spatial hierarchy configured; skipping resolution");
                Ok(None)
            }
        }
    }

    /// The fan-in aggregation callback.
    ///
    /// Pure over its inputs and therefore idempotent: invoking it again
    /// with the same outcome set yields identical totals and status, so
    /// at-least-once callback delivery never double counts. A cancelled
    /// session discards all child results and fails with a recorded
    /// cancellation reason.
    pub fn finalize_session(
        &self,
        session: &ProcessingSession,
        outcomes: &[RegionOutcome],
        cancelled: bool,
    ) -> ProcessingSession {
        let mut finalized = session.clone();
        finalized.finished_at = Some(Utc::now());

        if cancelled {
            finalized.status = SessionStatus::Failed;
            finalized.totals = SessionTotals {
                regions: session.totals.regions,
                regions_failed: 0,
                detected: 0,
                estimated: 0,
            };
            finalized.reasons = vec![FailureReason {
                region_id: None,
                kind: FailureKind::Cancelled,
                message: format!(
                    "session '{}' was cancelled; {} child result(s) discarded",
                    session.id,
                    outcomes.len()
                ),
            }];
            return finalized;
        }

        let mut detected = 0_u64;
        let mut estimated = 0_u64;
        let mut failed = 0_u32;
        let mut degraded = false;
        let mut reasons = Vec::new();

        for outcome in outcomes {
            match &outcome.result {
                Ok(success) => {
                    let estimation = &success.estimation;
                    if estimation.estimated_count < estimation.detected_count {
                        // Invariant violation: excluded from totals, never
                        // silently coerced into them.
                        error!(
                            region = %outcome.region_id,
                            estimated = estimation.estimated_count,
                            detected = estimation.detected_count,
                            "Estimation below detection count"
                        );
                        failed += 1;
                        reasons.push(FailureReason {
                            region_id: Some(outcome.region_id.clone()),
                            kind: FailureKind::InvariantViolation,
                            message: format!(
                                "estimated count {} below detected count {}",
                                estimation.estimated_count, estimation.detected_count
                            ),
                        });
                        continue;
                    }

                    detected += estimation.detected_count;
                    estimated += estimation.estimated_count;

                    if !success.degraded_tiles.is_empty() {
                        degraded = true;
                        reasons.push(FailureReason {
                            region_id: Some(outcome.region_id.clone()),
                            kind: FailureKind::Transient,
                            message: format!(
                                "{} tile(s) degraded and excluded",
                                success.degraded_tiles.len()
                            ),
                        });
                    }
                }
                Err(reason) => {
                    failed += 1;
                    reasons.push(reason.clone());
                }
            }
        }

        finalized.totals = SessionTotals {
            regions: outcomes.len() as u32,
            regions_failed: failed,
            detected,
            estimated,
        };
        finalized.status = if outcomes.is_empty() {
            SessionStatus::Completed
        } else if failed as usize == outcomes.len() {
            SessionStatus::Failed
        } else if failed > 0 || degraded {
            SessionStatus::Warning
        } else {
            SessionStatus::Completed
        };
        finalized.reasons = reasons;
        finalized
    }

    /// Mark a session failed before fan-out and persist it.
    async fn fail_session(
        &self,
        mut session: ProcessingSession,
        error: &Error,
    ) -> Result<ProcessingSession> {
        error!(session = %session.id, error = %error, "Session failed before fan-out");
        session.status = SessionStatus::Failed;
        session
            .reasons
            .push(FailureReason::from_error(None, error));
        session.finished_at = Some(Utc::now());
        self.records.upsert_session(&session).await?;
        Ok(session)
    }
}
