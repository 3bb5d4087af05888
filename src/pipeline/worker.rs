//! Child unit execution: tiled detection followed by estimation, with
//! bounded retries, independent timeout and circuit-open handling.

use crate::config::{ConfidenceTiers, EstimationConfig, TilingConfig};
use crate::constants::breaker::MAX_OPEN_WAITS;
use crate::detect::{Detection, TiledDetectionStage};
use crate::error::{Error, Result};
use crate::estimate::{Estimation, EstimationStage};
use crate::inference::{AcceleratorGate, ModelCache, ModelKind, WorkerId};
use crate::pipeline::{
    CircuitBreaker, FailureKind, FailureReason, RegionId, RetryPolicy, TaskMessage, TaskPayload,
};
use crate::segment::Region;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything one executing unit needs, passed explicitly at
/// construction time; no ambient global lookup.
#[derive(Clone)]
pub struct WorkerContext {
    /// Identity of this execution unit; model handles are owned per
    /// identity and never shared.
    pub worker: WorkerId,
    /// Model cache for this process.
    pub cache: Arc<ModelCache>,
    /// Breaker guarding the model-serving path.
    pub breaker: Arc<CircuitBreaker>,
    /// Accelerator gate, when inference runs on a GPU.
    pub gate: Option<Arc<AcceleratorGate>>,
    /// Tiling configuration.
    pub tiling: TilingConfig,
    /// Estimation calibration.
    pub estimation: EstimationConfig,
    /// Named confidence tiers.
    pub tiers: ConfidenceTiers,
    /// Retry policy for this unit.
    pub retry: RetryPolicy,
    /// Detection confidence threshold.
    pub min_confidence: f32,
    /// Independent timeout for each attempt.
    pub unit_timeout: Duration,
}

/// Successful result of one region-analysis unit.
#[derive(Debug, Clone)]
pub struct RegionSuccess {
    /// The region's estimation.
    pub estimation: Estimation,
    /// Canonical merged detections.
    pub detections: Vec<Detection>,
    /// Tiles excluded after exhausting attempts; non-empty makes the
    /// session WARNING-eligible.
    pub degraded_tiles: Vec<u32>,
}

/// Terminal outcome of one region-analysis unit.
#[derive(Debug, Clone)]
pub struct RegionOutcome {
    /// The region this outcome belongs to.
    pub region_id: RegionId,
    /// Attempts consumed (circuit-open rejections excluded).
    pub attempts: u32,
    /// Success payload or the recorded failure reason.
    pub result: std::result::Result<RegionSuccess, FailureReason>,
}

impl RegionOutcome {
    /// Whether the unit succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run one attempt-bounded unit of work to terminal resolution.
///
/// Timeouts count as failed attempts. Circuit-open rejections fail fast
/// without consuming an attempt: the unit waits out the breaker cooldown
/// (a bounded number of times) and tries again. A timed-out blocking
/// task is not preempted, since inference is not interruptible once
/// started, but its result is discarded.
pub(crate) async fn run_with_retries<T, F>(
    unit: &str,
    policy: RetryPolicy,
    unit_timeout: Duration,
    breaker: &CircuitBreaker,
    mut op: F,
) -> (u32, Result<T>)
where
    T: Send + 'static,
    F: FnMut() -> tokio::task::JoinHandle<Result<T>>,
{
    let mut attempts = 0_u32;
    let mut open_waits = 0_u32;

    loop {
        let handle = op();
        let result = match tokio::time::timeout(unit_timeout, handle).await {
            Err(_) => Err(Error::UnitTimeout {
                unit: unit.to_string(),
                seconds: unit_timeout.as_secs(),
            }),
            Ok(Err(join_error)) => Err(Error::Internal {
                message: format!("{unit} task failed to join: {join_error}"),
            }),
            Ok(Ok(result)) => result,
        };

        match result {
            Ok(value) => return (attempts + 1, Ok(value)),
            Err(e @ Error::CircuitOpen { .. }) => {
                if open_waits >= MAX_OPEN_WAITS {
                    return (attempts.max(1), Err(e));
                }
                open_waits += 1;
                let wait = breaker
                    .time_until_probe()
                    .unwrap_or(Duration::from_millis(50));
                debug!(unit, wait_ms = wait.as_millis(), "Circuit open, waiting for probe window");
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                attempts += 1;
                if e.is_transient() && attempts < policy.max_attempts {
                    let delay = policy.delay_after(attempts);
                    warn!(
                        unit,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Unit attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return (attempts, Err(e));
                }
            }
        }
    }
}

/// Run one region-analysis child unit to terminal resolution.
///
/// The unit arrives as a task message; a payload that does not carry a
/// region descriptor is a malformed message and fails permanently.
pub async fn run_region_unit(
    ctx: WorkerContext,
    image: Arc<RgbImage>,
    message: TaskMessage,
) -> RegionOutcome {
    let TaskPayload::Region(region) = message.payload else {
        return RegionOutcome {
            region_id: RegionId::new(format!("{}/?", message.session_id)),
            attempts: message.attempt,
            result: Err(FailureReason {
                region_id: None,
                kind: FailureKind::MalformedInput,
                message: format!("{} message carried no region descriptor", message.kind),
            }),
        };
    };

    debug!(
        session = %message.session_id,
        region = %region.id,
        delivery_attempt = message.attempt,
        "Region unit picked up"
    );
    let region_id = region.id.clone();
    let breaker = Arc::clone(&ctx.breaker);

    let (attempts, result) = run_with_retries(
        "region-analysis",
        ctx.retry,
        ctx.unit_timeout,
        &breaker,
        || {
            let ctx = ctx.clone();
            let image = Arc::clone(&image);
            let region = region.clone();
            tokio::task::spawn_blocking(move || analyze_region(&ctx, &image, &region))
        },
    )
    .await;

    RegionOutcome {
        region_id: region_id.clone(),
        attempts,
        result: result.map_err(|e| {
            warn!(region = %region_id, attempts, error = %e, "Region unit failed permanently");
            FailureReason::from_error(Some(region_id.clone()), &e)
        }),
    }
}

/// One synchronous attempt: acquire the detector, run tiled detection,
/// then estimate.
fn analyze_region(ctx: &WorkerContext, image: &RgbImage, region: &Region) -> Result<RegionSuccess> {
    let model = ctx.cache.acquire(ctx.worker, ModelKind::Detection)?;
    let detector = model.as_detector()?;

    let detect_stage = TiledDetectionStage::new(
        ctx.tiling.clone(),
        Arc::clone(&ctx.breaker),
        ctx.gate.clone(),
    );
    let outcome = detect_stage.run(detector, image, region, ctx.min_confidence)?;

    let estimation =
        EstimationStage::new(ctx.estimation.clone(), ctx.tiers).run(region, &outcome.detections)?;
    if estimation.estimated_count < estimation.detected_count {
        return Err(Error::InvariantViolation {
            message: format!(
                "region '{}': estimated count {} below detected count {}",
                region.id, estimation.estimated_count, estimation.detected_count
            ),
        });
    }

    Ok(RegionSuccess {
        estimation,
        detections: outcome.detections,
        degraded_tiles: outcome.degraded_tiles,
    })
}
