//! In-memory collaborator implementations for the single-process CLI mode
//! and tests.

use crate::detect::Detection;
use crate::error::{Error, Result};
use crate::estimate::Estimation;
use crate::pipeline::{ProcessingSession, SessionId};
use crate::segment::Region;
use crate::store::{BlobRef, BlobRole, BlobStore, RecordStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    counter: AtomicU64,
}

impl InMemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        lock(&self.blobs).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        lock(&self.blobs).is_empty()
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn put(&self, session: &SessionId, role: BlobRole, bytes: Vec<u8>) -> Result<BlobRef> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let reference = BlobRef::new(format!("mem:{session}/{role}/{n}"));
        lock(&self.blobs).insert(reference.as_str().to_string(), bytes);
        Ok(reference)
    }

    async fn get(&self, reference: &BlobRef) -> Result<Vec<u8>> {
        lock(&self.blobs)
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| Error::BlobNotFound {
                reference: reference.to_string(),
            })
    }
}

/// In-memory record store with idempotent upserts.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    sessions: Mutex<HashMap<SessionId, ProcessingSession>>,
    regions: Mutex<HashMap<String, Region>>,
    detections: Mutex<HashMap<String, Detection>>,
    estimations: Mutex<HashMap<String, Estimation>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored detection records.
    pub fn detection_count(&self) -> usize {
        lock(&self.detections).len()
    }

    /// Number of stored region records.
    pub fn region_count(&self) -> usize {
        lock(&self.regions).len()
    }
}

impl RecordStore for InMemoryRecordStore {
    async fn upsert_session(&self, session: &ProcessingSession) -> Result<()> {
        lock(&self.sessions).insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<Option<ProcessingSession>> {
        Ok(lock(&self.sessions).get(id).cloned())
    }

    async fn upsert_region(&self, region: &Region) -> Result<()> {
        lock(&self.regions).insert(region.id.to_string(), region.clone());
        Ok(())
    }

    async fn upsert_detections(&self, detections: &[Detection]) -> Result<()> {
        let mut map = lock(&self.detections);
        for detection in detections {
            map.insert(detection.id.clone(), detection.clone());
        }
        Ok(())
    }

    async fn upsert_estimation(&self, estimation: &Estimation) -> Result<()> {
        lock(&self.estimations).insert(estimation.region_id.to_string(), estimation.clone());
        Ok(())
    }

    async fn estimations_for_session(&self, id: &SessionId) -> Result<Vec<Estimation>> {
        let mut estimations: Vec<Estimation> = lock(&self.estimations)
            .values()
            .filter(|e| e.region_id.belongs_to(id))
            .cloned()
            .collect();
        estimations.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        Ok(estimations)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EstimationMethod;
    use crate::estimate::{CalibrationInputs, ConfidenceBand};
    use crate::pipeline::RegionId;

    fn estimation(region: &str, count: u64) -> Estimation {
        Estimation {
            region_id: RegionId::new(region),
            method: EstimationMethod::Band,
            estimated_count: count,
            detected_count: count,
            band: ConfidenceBand {
                low: count,
                expected: count,
                high: count,
            },
            calibration: CalibrationInputs {
                band_fraction: Some(0.2),
                density_per_megapixel: None,
            },
        }
    }

    #[tokio::test]
    async fn test_blob_round_trip() {
        let store = InMemoryBlobStore::new();
        let session = SessionId::new("s1");

        let reference = store
            .put(&session, BlobRole::Original, vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(store.get(&reference).await.unwrap(), vec![1, 2, 3]);

        let missing = BlobRef::new("mem:nope/original/99");
        assert!(matches!(
            store.get(&missing).await,
            Err(Error::BlobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_estimation_upsert_is_idempotent() {
        let store = InMemoryRecordStore::new();
        let session = SessionId::new("s1");

        // Same stable key delivered twice: one record, not two.
        store.upsert_estimation(&estimation("s1/r0", 10)).await.unwrap();
        store.upsert_estimation(&estimation("s1/r0", 10)).await.unwrap();
        store.upsert_estimation(&estimation("s1/r1", 5)).await.unwrap();

        let estimations = store.estimations_for_session(&session).await.unwrap();
        assert_eq!(estimations.len(), 2);
        assert_eq!(
            estimations.iter().map(|e| e.estimated_count).sum::<u64>(),
            15
        );
    }

    #[tokio::test]
    async fn test_estimations_scoped_to_session() {
        let store = InMemoryRecordStore::new();
        store.upsert_estimation(&estimation("s1/r0", 10)).await.unwrap();
        store.upsert_estimation(&estimation("s2/r0", 7)).await.unwrap();

        let estimations = store
            .estimations_for_session(&SessionId::new("s1"))
            .await
            .unwrap();
        assert_eq!(estimations.len(), 1);
        assert_eq!(estimations[0].estimated_count, 10);
    }
}
