//! Dense range caching with whole-cache invalidation.
//!
//! Entries live in a generation map behind an `RwLock<Arc<..>>`. Clearing
//! swaps in a fresh generation, so readers see either the old map or the new
//! empty one and never a partially cleared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use ratesync_common::{Currency, DenseRatePoint, ImportResult};

use crate::importer::CommitHook;

/// Cache key: the literal query tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub currency: Currency,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl CacheKey {
    pub fn new(currency: Currency, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            currency,
            start,
            end,
        }
    }
}

/// Generation token captured before reading the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration(u64);

#[derive(Debug, Clone)]
struct CacheEntry {
    points: Arc<Vec<DenseRatePoint>>,
    cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_valid(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => Utc::now().signed_duration_since(self.cached_at) < ttl,
            None => true,
        }
    }
}

struct Generation {
    id: u64,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            entries: DashMap::new(),
        }
    }
}

/// Configuration for the dense range cache.
#[derive(Debug, Clone)]
pub struct DenseRangeCacheConfig {
    /// Optional per-entry TTL; entries otherwise live until the next import.
    pub ttl: Option<Duration>,
    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for DenseRangeCacheConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_entries: 10000,
        }
    }
}

/// Thread-safe read-through cache for dense ranges.
pub struct DenseRangeCache {
    current: RwLock<Arc<Generation>>,
    next_id: AtomicU64,
    config: DenseRangeCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl DenseRangeCache {
    /// Create a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(DenseRangeCacheConfig::default())
    }

    /// Create a new cache with custom configuration.
    pub fn with_config(config: DenseRangeCacheConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::new(0))),
            next_id: AtomicU64::new(1),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<Generation> {
        self.current.read().clone()
    }

    /// Get a cached range if present and valid.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<DenseRatePoint>> {
        let generation = self.snapshot();

        if let Some(entry) = generation.entries.get(key) {
            if entry.is_valid(self.config.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(currency = %key.currency, "Cache hit");
                return Some(entry.points.as_ref().clone());
            }
            debug!(currency = %key.currency, "Cache entry expired");
            drop(entry);
            generation.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(currency = %key.currency, "Cache miss");
        None
    }

    /// Token to pass to [`DenseRangeCache::insert`] for a value about to be
    /// computed from the store.
    pub fn generation(&self) -> CacheGeneration {
        CacheGeneration(self.current.read().id)
    }

    /// Insert a computed range.
    ///
    /// Dropped (returns `false`) when the cache was cleared after `token` was
    /// taken, since the value may predate the committed import.
    pub fn insert(
        &self,
        key: CacheKey,
        points: Vec<DenseRatePoint>,
        token: CacheGeneration,
    ) -> bool {
        // Hold the read guard so a concurrent clear cannot slip in between the
        // generation check and the insert.
        let guard = self.current.read();
        if guard.id != token.0 {
            debug!(currency = %key.currency, "Discarding stale cache fill");
            return false;
        }

        if guard.entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            guard.entries.retain(|_, entry| entry.is_valid(ttl));
            if guard.entries.len() >= self.config.max_entries {
                debug!(currency = %key.currency, "Cache full, not caching");
                return false;
            }
        }

        guard.entries.insert(
            key,
            CacheEntry {
                points: Arc::new(points),
                cached_at: Utc::now(),
            },
        );
        true
    }

    /// Drop every entry atomically.
    pub fn clear(&self) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.current.write() = Arc::new(Generation::new(id));
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(generation = id, "Cache cleared");
    }

    /// Get the number of entries in cache.
    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every cached entry, for inspection.
    pub fn entries(&self) -> Vec<(CacheKey, Vec<DenseRatePoint>)> {
        self.snapshot()
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().points.as_ref().clone()))
            .collect()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for DenseRangeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitHook for DenseRangeCache {
    fn after_commit(&self, results: &[ImportResult]) {
        debug!(series = results.len(), "Import committed, clearing cache");
        self.clear();
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}
