//! Report types assembled from a finalized session.

use crate::config::EstimationMethod;
use crate::estimate::Estimation;
use crate::pipeline::ProcessingSession;
use serde::Serialize;

/// Per-region row of a session report.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    /// Region identifier.
    pub region_id: String,
    /// Estimation method used.
    pub method: EstimationMethod,
    /// Accepted detections.
    pub detected: u64,
    /// Estimated population.
    pub estimated: u64,
    /// Low bound of the confidence band.
    pub low: u64,
    /// High bound of the confidence band.
    pub high: u64,
}

/// A finalized session plus its per-region estimates.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// The session record.
    pub session: ProcessingSession,
    /// One row per successfully estimated region.
    pub regions: Vec<RegionReport>,
}

impl SessionReport {
    /// Assemble a report from a session and its estimation records.
    pub fn build(session: ProcessingSession, estimations: &[Estimation]) -> Self {
        let regions = estimations
            .iter()
            .map(|e| RegionReport {
                region_id: e.region_id.to_string(),
                method: e.method,
                detected: e.detected_count,
                estimated: e.estimated_count,
                low: e.band.low,
                high: e.band.high,
            })
            .collect();
        Self { session, regions }
    }
}
