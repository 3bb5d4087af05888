//! Unit-of-work message contract for task dispatch.
//!
//! The orchestrator enqueues one message per unit of work; delivery is
//! at-least-once, so every side effect downstream of a message is an
//! idempotent upsert keyed by stable identifiers.

use crate::pipeline::SessionId;
use crate::segment::Region;
use crate::store::BlobRef;
use serde::{Deserialize, Serialize};

/// Kind of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    /// Full-image segmentation pass.
    Segmentation,
    /// Per-region tiled detection followed by estimation.
    RegionAnalysis,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segmentation => write!(f, "segmentation"),
            Self::RegionAnalysis => write!(f, "region-analysis"),
        }
    }
}

/// Payload of a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPayload {
    /// Image reference, for the segmentation unit.
    Image(BlobRef),
    /// Region descriptor, for a region-analysis unit.
    Region(Region),
}

/// One unit-of-work message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Owning session.
    pub session_id: SessionId,
    /// Kind of work.
    pub kind: UnitKind,
    /// Work payload.
    pub payload: TaskPayload,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

impl TaskMessage {
    /// Build a region-analysis message.
    pub fn region_analysis(session_id: SessionId, region: Region) -> Self {
        Self {
            session_id,
            kind: UnitKind::RegionAnalysis,
            payload: TaskPayload::Region(region),
            attempt: 1,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pipeline::RegionId;
    use crate::segment::ContainerClass;

    #[test]
    fn test_message_round_trips_through_json() {
        let message = TaskMessage::region_analysis(
            SessionId::new("s1"),
            Region {
                id: RegionId::new("s1/r0"),
                session_id: SessionId::new("s1"),
                outline: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
                label: ContainerClass::Pot,
                confidence: 0.8,
            },
        );

        let json = serde_json::to_string(&message).unwrap();
        let back: TaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, SessionId::new("s1"));
        assert_eq!(back.kind, UnitKind::RegionAnalysis);
        assert_eq!(back.attempt, 1);
    }
}
