//! External collaborator contracts: blob storage and relational records.
//!
//! The core consumes these through narrow async traits; production
//! deployments wire real object storage and a relational database behind
//! them. In-memory implementations ship here for the single-process CLI
//! mode and tests. Upserts are keyed by stable identifiers so
//! at-least-once delivery never creates duplicates.

mod memory;

pub use memory::{InMemoryBlobStore, InMemoryRecordStore};

use crate::detect::Detection;
use crate::error::Result;
use crate::estimate::Estimation;
use crate::pipeline::{ProcessingSession, SessionId};
use crate::segment::Region;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Role of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobRole {
    /// The photo as uploaded.
    Original,
    /// Processed/annotated artifact.
    Processed,
    /// Downscaled preview.
    Thumbnail,
}

impl std::fmt::Display for BlobRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Processed => write!(f, "processed"),
            Self::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// Opaque reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Create a reference from its string form.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object storage collaborator.
///
/// The core never keeps canonical bytes in memory longer than one stage's
/// processing; everything durable goes through here.
pub trait BlobStore: Send + Sync + 'static {
    /// Store bytes for a session under the given role.
    fn put(
        &self,
        session: &SessionId,
        role: BlobRole,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<BlobRef>> + Send;

    /// Fetch bytes by reference.
    fn get(&self, reference: &BlobRef) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Relational persistence collaborator.
///
/// All writes are idempotent upserts keyed by stable identifiers.
pub trait RecordStore: Send + Sync + 'static {
    /// Upsert a session record.
    fn upsert_session(
        &self,
        session: &ProcessingSession,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch a session record.
    fn fetch_session(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<ProcessingSession>>> + Send;

    /// Upsert a region record.
    fn upsert_region(&self, region: &Region) -> impl Future<Output = Result<()>> + Send;

    /// Upsert a batch of detection records.
    fn upsert_detections(
        &self,
        detections: &[Detection],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Upsert a region's estimation record.
    fn upsert_estimation(
        &self,
        estimation: &Estimation,
    ) -> impl Future<Output = Result<()>> + Send;

    /// All estimation records belonging to a session.
    fn estimations_for_session(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Vec<Estimation>>> + Send;
}
