//! Thread-safe cache of loaded inference models.
//!
//! Entries are keyed by (worker identity, model kind). Loading happens at
//! most once per key under concurrent first use: callers contend on a
//! per-key slot lock, so a slow load for one key never blocks hits on
//! another. After a configurable number of acquisitions an entry is
//! discarded and lazily reloaded, bounding accumulated memory growth.

use crate::error::Result;
use crate::inference::{LoadedModel, ModelKind, ModelLoader, WorkerId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

type CacheKey = (WorkerId, ModelKind);

struct Slot {
    model: Option<Arc<LoadedModel>>,
    loaded_at: Option<DateTime<Utc>>,
    uses: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            model: None,
            loaded_at: None,
            uses: 0,
        }
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of model loads performed (including reloads after eviction).
    pub loads: u64,
    /// Number of acquisitions served from an existing entry.
    pub hits: u64,
    /// Number of entries discarded after reaching the usage threshold.
    pub evictions: u64,
}

/// Thread-safe model cache keyed by (worker identity, model kind).
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    evict_after_uses: u64,
    slots: Mutex<HashMap<CacheKey, Arc<Mutex<Slot>>>>,
    stats: Mutex<CacheStats>,
}

impl ModelCache {
    /// Create a cache over the given loader.
    ///
    /// `evict_after_uses` bounds how many acquisitions an entry serves
    /// before being discarded for lazy reload.
    pub fn new(loader: Arc<dyn ModelLoader>, evict_after_uses: u64) -> Self {
        Self {
            loader,
            evict_after_uses: evict_after_uses.max(1),
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Acquire a model handle for the given worker identity.
    ///
    /// Exactly one load happens per key under concurrent first use; hits
    /// return the cached handle without blocking other keys. A failed
    /// load is never cached: the next call retries.
    pub fn acquire(&self, worker: WorkerId, kind: ModelKind) -> Result<Arc<LoadedModel>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry((worker, kind))
                    .or_insert_with(|| Arc::new(Mutex::new(Slot::empty()))),
            )
        };

        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.model.is_some() && slot.uses >= self.evict_after_uses {
            debug!(
                %worker,
                %kind,
                uses = slot.uses,
                loaded_at = ?slot.loaded_at,
                "Evicting model cache entry after usage threshold"
            );
            slot.model = None;
            slot.loaded_at = None;
            slot.uses = 0;
            self.bump(|s| s.evictions += 1);
        }

        if let Some(model) = slot.model.clone() {
            slot.uses += 1;
            self.bump(|s| s.hits += 1);
            return Ok(model);
        }

        // First use (or post-eviction reload) for this key. Only callers
        // of this key wait here; other worker identities proceed.
        let start = Instant::now();
        let model = Arc::new(self.loader.load(kind)?);
        info!(
            %worker,
            %kind,
            elapsed_ms = start.elapsed().as_millis(),
            "Loaded model"
        );

        slot.model = Some(Arc::clone(&model));
        slot.loaded_at = Some(Utc::now());
        slot.uses = 1;
        self.bump(|s| s.loads += 1);

        Ok(model)
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("evict_after_uses", &self.evict_after_uses)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
