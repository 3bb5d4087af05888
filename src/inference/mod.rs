//! Inference model abstractions, the model cache and the ONNX backend.

mod cache;
mod onnx;

pub use cache::{CacheStats, ModelCache};
pub use onnx::OnnxModelLoader;

use crate::detect::BoundingBox;
use crate::error::{Error, Result};
use crate::segment::RegionProposal;
use image::RgbImage;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Kind of inference model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Region-proposal model run once over the full image.
    Segmentation,
    /// Plant detection model run per tile.
    Detection,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segmentation => write!(f, "segmentation"),
            Self::Detection => write!(f, "detection"),
        }
    }
}

/// Identity of a concurrent execution unit.
///
/// Cache entries are keyed by worker identity and never shared across
/// identities: each executing unit owns its handle outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A single tile-local detection before translation to global coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// Bounding box in tile-local pixel coordinates.
    pub bbox: BoundingBox,
    /// Confidence score in [0, 1].
    pub confidence: f32,
}

/// Region-proposal model interface.
pub trait Segmenter: Send + Sync {
    /// Propose container regions over the full image.
    ///
    /// Proposals below `min_confidence` must already be discarded by the
    /// implementation. Deterministic for a fixed model version and input.
    fn propose_regions(
        &self,
        image: &RgbImage,
        min_confidence: f32,
        resolution: u32,
    ) -> Result<Vec<RegionProposal>>;
}

/// Plant detection model interface, invoked per tile.
pub trait Detector: Send + Sync {
    /// Detect plants in one tile, returning tile-local boxes.
    fn detect_tile(&self, tile: &RgbImage, min_confidence: f32) -> Result<Vec<RawDetection>>;
}

/// A loaded model handle held by the cache.
pub enum LoadedModel {
    /// A loaded segmentation model.
    Segmentation(Box<dyn Segmenter>),
    /// A loaded detection model.
    Detection(Box<dyn Detector>),
}

impl LoadedModel {
    /// The kind of this handle.
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Segmentation(_) => ModelKind::Segmentation,
            Self::Detection(_) => ModelKind::Detection,
        }
    }

    /// Borrow as a segmenter, or fail with a kind mismatch.
    pub fn as_segmenter(&self) -> Result<&dyn Segmenter> {
        match self {
            Self::Segmentation(model) => Ok(model.as_ref()),
            Self::Detection(_) => Err(Error::ModelKindMismatch {
                expected: ModelKind::Segmentation,
            }),
        }
    }

    /// Borrow as a detector, or fail with a kind mismatch.
    pub fn as_detector(&self) -> Result<&dyn Detector> {
        match self {
            Self::Detection(model) => Ok(model.as_ref()),
            Self::Segmentation(_) => Err(Error::ModelKindMismatch {
                expected: ModelKind::Detection,
            }),
        }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoadedModel").field(&self.kind()).finish()
    }
}

/// Loader invoked by the cache on first use and after eviction.
pub trait ModelLoader: Send + Sync {
    /// Load a model of the given kind.
    fn load(&self, kind: ModelKind) -> Result<LoadedModel>;
}

/// Mutual exclusion for one physical accelerator.
///
/// Inference on an accelerator runs one unit at a time; the accelerator
/// context must not be entered by concurrently executing units. Workers
/// hold the gate for the duration of a tile or segmentation pass.
#[derive(Debug, Default)]
pub struct AcceleratorGate {
    inner: Mutex<()>,
}

impl AcceleratorGate {
    /// Create a gate for one accelerator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access to the accelerator.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
