//! Segmentation stage: coarse container region proposals.

use crate::detect::BoundingBox;
use crate::error::{Error, Result};
use crate::inference::Segmenter;
use crate::pipeline::{RegionId, SessionId};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Coarse container type proposed by the segmentation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerClass {
    /// Seedling tray.
    Tray,
    /// Individual pot block.
    Pot,
    /// In-ground field bed.
    FieldBed,
    /// Class index not recognized by this build.
    Unknown,
}

impl ContainerClass {
    /// Map a model class index to a container class.
    pub fn from_class_index(index: usize) -> Self {
        match index {
            0 => Self::Tray,
            1 => Self::Pot,
            2 => Self::FieldBed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tray => write!(f, "tray"),
            Self::Pot => write!(f, "pot"),
            Self::FieldBed => write!(f, "field-bed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A raw region proposal from the segmentation model, before ids are
/// assigned.
#[derive(Debug, Clone)]
pub struct RegionProposal {
    /// Bounding polygon in image pixel coordinates.
    pub outline: Vec<(f32, f32)>,
    /// Coarse container type.
    pub label: ContainerClass,
    /// Confidence score in [0, 1].
    pub confidence: f32,
}

/// A proposed sub-area of the original image, owned by one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Stable id (`{session}/r{index}`), deterministic for idempotent
    /// upserts.
    pub id: RegionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Bounding polygon in image pixel coordinates.
    pub outline: Vec<(f32, f32)>,
    /// Coarse container type.
    pub label: ContainerClass,
    /// Confidence score in [0, 1].
    pub confidence: f32,
}

impl Region {
    /// Axis-aligned bounding box of the region polygon.
    ///
    /// A region without a usable polygon is an invariant violation, not
    /// something to coerce into an empty box.
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        if self.outline.len() < 3 {
            return Err(Error::RegionWithoutPolygon {
                region_id: self.id.to_string(),
            });
        }

        let mut x1 = f32::INFINITY;
        let mut y1 = f32::INFINITY;
        let mut x2 = f32::NEG_INFINITY;
        let mut y2 = f32::NEG_INFINITY;
        for &(x, y) in &self.outline {
            x1 = x1.min(x);
            y1 = y1.min(y);
            x2 = x2.max(x);
            y2 = y2.max(y);
        }

        Ok(BoundingBox { x1, y1, x2, y2 })
    }
}

/// Runs the region-proposal model over a full image.
#[derive(Debug, Clone)]
pub struct SegmentationStage {
    /// Minimum confidence for accepting a proposal.
    pub min_confidence: f32,
    /// Square inference resolution for the model pass.
    pub resolution: u32,
}

impl SegmentationStage {
    /// Create a stage with the given threshold and inference resolution.
    pub fn new(min_confidence: f32, resolution: u32) -> Self {
        Self {
            min_confidence,
            resolution,
        }
    }

    /// Propose regions and assign stable ids in model output order.
    pub fn run(
        &self,
        segmenter: &dyn Segmenter,
        image: &RgbImage,
        session_id: &SessionId,
    ) -> Result<Vec<Region>> {
        let proposals = segmenter.propose_regions(image, self.min_confidence, self.resolution)?;
        let total = proposals.len();

        let regions: Vec<Region> = proposals
            .into_iter()
            .filter(|p| p.confidence >= self.min_confidence)
            .enumerate()
            .map(|(index, proposal)| Region {
                id: RegionId::new(format!("{session_id}/r{index}")),
                session_id: session_id.clone(),
                outline: proposal.outline,
                label: proposal.label,
                confidence: proposal.confidence,
            })
            .collect();

        if regions.len() < total {
            debug!(
                discarded = total - regions.len(),
                threshold = self.min_confidence,
                "Discarded sub-threshold region proposals"
            );
        }
        info!(regions = regions.len(), "Segmentation complete");

        Ok(regions)
    }
}
