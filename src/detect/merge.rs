//! Containment-based suppression of duplicate detections across tiles.
//!
//! The merge criterion is intersection-over-SMALLER-area rather than
//! symmetric IoU: an object split across a tile boundary produces partial
//! boxes of very different sizes, and classic IoU fails to merge a small
//! partial sitting inside a large full box.

use crate::detect::Detection;

/// Merge candidate detections into the canonical set for a region.
///
/// Candidates are sorted by confidence descending; the highest-confidence
/// unsuppressed candidate is accepted greedily and suppresses every
/// lower-confidence candidate whose intersection-over-smaller-area with it
/// exceeds `merge_threshold`. Idempotent: merging an already-merged set
/// returns it unchanged.
pub fn merge_detections(mut detections: Vec<Detection>, merge_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    // Confidence descending, with the stable id as tie-break so equal
    // scores always merge in the same order.
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..detections.len() {
            if !suppressed[j]
                && detections[i].bbox.overlap_over_smaller(&detections[j].bbox) > merge_threshold
            {
                suppressed[j] = true;
            }
        }

        keep.push(detections[i].clone());
    }

    keep
}
