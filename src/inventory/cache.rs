//! Per-endpoint set of external ids already present locally.
//!
//! Built lazily by scanning the whole local inventory once per endpoint, then
//! held for the life of the cache object. Concurrent first-time builds for
//! the same endpoint are coalesced: each endpoint has its own slot lock, and
//! later callers block on it until the in-flight build finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::LocalInventory;
use crate::error::CacheBuildError;
use crate::model::ExternalId;

/// Rows requested per inventory scan page.
pub const INVENTORY_SCAN_PAGE: usize = 1000;

/// Snapshot of the external ids owned locally for one endpoint.
#[derive(Debug, Clone)]
pub struct LocalIdSet {
    pub endpoint: String,
    pub external_ids: HashSet<ExternalId>,
    pub built_at: DateTime<Utc>,
    built_instant: Instant,
}

impl LocalIdSet {
    pub fn new(endpoint: impl Into<String>, external_ids: HashSet<ExternalId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            external_ids,
            built_at: Utc::now(),
            built_instant: Instant::now(),
        }
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.external_ids.contains(external_id)
    }

    pub fn count(&self) -> usize {
        self.external_ids.len()
    }

    pub fn age(&self) -> Duration {
        self.built_instant.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub endpoint: String,
    pub count: usize,
    pub built_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<Arc<LocalIdSet>>>>;

pub struct LocalIdentifierCache {
    inventory: Arc<dyn LocalInventory>,
    slots: Mutex<HashMap<String, Slot>>,
    max_age: Option<Duration>,
    scan_page_size: usize,
}

impl LocalIdentifierCache {
    pub fn new(inventory: Arc<dyn LocalInventory>) -> Self {
        Self {
            inventory,
            slots: Mutex::new(HashMap::new()),
            max_age: None,
            scan_page_size: INVENTORY_SCAN_PAGE,
        }
    }

    /// Rebuild entries older than `max_age` on next access.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size.max(1);
        self
    }

    fn slot(&self, endpoint: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(endpoint.to_string()).or_default())
    }

    fn is_stale(&self, ids: &LocalIdSet) -> bool {
        self.max_age.is_some_and(|max| ids.age() > max)
    }

    /// Return the cached id set for `endpoint`, building it first if needed.
    pub fn get_or_build(&self, endpoint: &str) -> Result<Arc<LocalIdSet>, CacheBuildError> {
        let slot = self.slot(endpoint);
        let mut guard = slot.lock();
        if let Some(ids) = guard.as_ref() {
            if !self.is_stale(ids) {
                return Ok(Arc::clone(ids));
            }
            tracing::info!(endpoint, age_secs = ids.age().as_secs(), "identifier cache expired");
        }

        // A failed build leaves the slot empty so the next caller retries.
        let built = Arc::new(self.build(endpoint)?);
        *guard = Some(Arc::clone(&built));
        Ok(built)
    }

    fn build(&self, endpoint: &str) -> Result<LocalIdSet, CacheBuildError> {
        let start = Instant::now();
        tracing::info!(endpoint, "building local identifier cache");

        let mut external_ids = HashSet::new();
        let mut offset = 0usize;
        let mut scanned = 0usize;
        loop {
            let batch = self
                .inventory
                .scan_links(offset, self.scan_page_size)
                .map_err(|source| CacheBuildError {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            let returned = batch.len();
            scanned += returned;
            external_ids.extend(
                batch
                    .into_iter()
                    .filter(|link| link.endpoint == endpoint)
                    .map(|link| link.external_id),
            );
            if returned < self.scan_page_size {
                break;
            }
            offset += returned;
        }

        let ids = LocalIdSet::new(endpoint, external_ids);
        tracing::info!(
            endpoint,
            count = ids.count(),
            scanned,
            duration_ms = start.elapsed().as_millis() as u64,
            "local identifier cache built"
        );
        Ok(ids)
    }

    /// Drop the id set for `endpoint`.
    ///
    /// The slot itself stays in place, so a build already in flight finishes
    /// first and later callers still queue behind its lock.
    pub fn invalidate(&self, endpoint: &str) {
        let slot = self.slots.lock().get(endpoint).cloned();
        if let Some(slot) = slot
            && slot.lock().take().is_some()
        {
            tracing::debug!(endpoint, "identifier cache invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            *slot.lock() = None;
        }
        tracing::debug!("all identifier caches invalidated");
    }

    /// Drop and rebuild the id set for `endpoint`.
    pub fn rebuild(&self, endpoint: &str) -> Result<Arc<LocalIdSet>, CacheBuildError> {
        self.invalidate(endpoint);
        self.get_or_build(endpoint)
    }

    /// Stats for a built cache; `None` if absent or still building.
    pub fn stats(&self, endpoint: &str) -> Option<CacheStats> {
        let slot = self.slots.lock().get(endpoint).cloned()?;
        let guard = slot.try_lock()?;
        guard.as_ref().map(|ids| CacheStats {
            endpoint: endpoint.to_string(),
            count: ids.count(),
            built_at: ids.built_at,
        })
    }
}
