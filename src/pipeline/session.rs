//! Processing session state and failure reporting.

use crate::error::Error;
use crate::spatial::NodeId;
use crate::store::BlobRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identifier of a processing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a region within a session (`{session}/r{index}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Create a region id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this region belongs to the given session.
    ///
    /// Region ids embed their session id as a `{session}/` prefix.
    pub fn belongs_to(&self, session: &SessionId) -> bool {
        self.0
            .strip_prefix(session.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle status.
///
/// Terminal once `Completed` or `Failed`; `Warning` is terminal too and
/// marks an explicitly partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepted, not yet started.
    Pending,
    /// Orchestration in progress.
    Processing,
    /// All children succeeded.
    Completed,
    /// Partial result: some children failed or degraded after retries.
    Warning,
    /// No usable result.
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Coarse classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Transient infrastructure failure that exhausted its retries.
    Transient,
    /// Input that can never succeed (undecodable image, missing
    /// calibration).
    MalformedInput,
    /// A logical invariant was violated.
    InvariantViolation,
    /// The circuit guarding a dependency rejected the work.
    CircuitOpen,
    /// The unit exceeded its independent timeout on every attempt.
    Timeout,
    /// The session was cancelled before aggregation.
    Cancelled,
}

/// A structured failure reason surfaced to the API layer.
///
/// Never a raw backtrace: the message is the error's display chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReason {
    /// Region the failure belongs to, when region-scoped.
    pub region_id: Option<RegionId>,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl FailureReason {
    /// Classify an error into a recorded reason.
    pub fn from_error(region_id: Option<RegionId>, error: &Error) -> Self {
        let kind = match error {
            Error::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Error::UnitTimeout { .. } => FailureKind::Timeout,
            Error::SessionCancelled { .. } => FailureKind::Cancelled,
            Error::InvariantViolation { .. } | Error::RegionWithoutPolygon { .. } => {
                FailureKind::InvariantViolation
            }
            Error::ImageDecode { .. }
            | Error::MissingCalibration { .. }
            | Error::InvalidLongitude { .. }
            | Error::InvalidLatitude { .. } => FailureKind::MalformedInput,
            _ => FailureKind::Transient,
        };
        Self {
            region_id,
            kind,
            message: error.to_string(),
        }
    }
}

/// Aggregate counts over a session's successful regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Regions proposed by segmentation.
    pub regions: u32,
    /// Regions that failed permanently.
    pub regions_failed: u32,
    /// Sum of accepted detections across successful regions.
    pub detected: u64,
    /// Sum of estimated counts across successful regions.
    pub estimated: u64,
}

/// One photo's processing lifecycle.
///
/// Mutated only by the orchestrator and its fan-in callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSession {
    /// Session identifier.
    pub id: SessionId,
    /// Reference to the original image blob.
    pub image: BlobRef,
    /// Resolved spatial node, if any.
    pub location: Option<NodeId>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Aggregate counts; valid once `Completed` or `Warning`.
    pub totals: SessionTotals,
    /// Structured failure reasons, populated for `Warning` and `Failed`.
    pub reasons: Vec<FailureReason>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingSession {
    /// Create a pending session for an accepted photo.
    pub fn new(id: SessionId, image: BlobRef) -> Self {
        Self {
            id,
            image,
            location: None,
            status: SessionStatus::Pending,
            totals: SessionTotals::default(),
            reasons: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Cooperative cancellation flag for one session.
///
/// Requesting cancellation never preempts a running inference call:
/// dispatched children run to completion and the fan-in callback discards
/// their results.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_id_session_prefix() {
        let session = SessionId::new("lot-42");
        assert!(RegionId::new("lot-42/r0").belongs_to(&session));
        assert!(!RegionId::new("lot-421/r0").belongs_to(&session));
        assert!(!RegionId::new("other/r0").belongs_to(&session));
    }

    #[test]
    fn test_failure_reason_classification() {
        let reason = FailureReason::from_error(
            None,
            &Error::ImageDecode {
                reason: "truncated".to_string(),
            },
        );
        assert_eq!(reason.kind, FailureKind::MalformedInput);

        let reason = FailureReason::from_error(
            Some(RegionId::new("s/r1")),
            &Error::CircuitOpen {
                dependency: "model-serving".to_string(),
            },
        );
        assert_eq!(reason.kind, FailureKind::CircuitOpen);
        assert_eq!(reason.region_id, Some(RegionId::new("s/r1")));
    }

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.request();
        assert!(flag.is_cancelled());
    }
}
