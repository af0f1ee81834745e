//! The "CACHE" Engine - TTL, Geo-Anchored and Persisted Memoization
//!
//! A bounded key/value store for expensive derived values (zone lists,
//! per-cell boundary distances). An entry is valid while:
//!
//! 1. Its TTL has not elapsed, and
//! 2. If it carries a geo anchor and the read supplies a query point, the
//!    two are within the relevance radius (50 km by default).
//!
//! At capacity the entry with the lowest `access_count * idle_ms` score is
//! evicted. Persistent entries are written to a [`SnapshotStore`] on every
//! persistent `set` and on every sweep, and reloaded at startup.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbe_env::ZbeContext;

use crate::config::CacheConfig;
use crate::snapshot::SnapshotStore;
use crate::zbe_geometry::{self, Point};
use crate::zones::{Zone, ZoneId};

// ============================================================================
// ENTRIES
// ============================================================================

/// A cached payload with its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub persistent: bool,
    pub geo_anchor: Option<Point>,
    pub access_count: u64,
    pub last_access_at_ms: u64,

    /// Insertion order, used to break eviction ties
    #[serde(skip)]
    seq: u64,
}

impl<T> CacheEntry<T> {
    /// TTL check only
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) <= self.ttl_ms
    }

    /// TTL check, then geo relevance when both anchor and query exist.
    pub fn is_valid_at(&self, now_ms: u64, query: Option<Point>, radius_m: f64) -> bool {
        if !self.is_fresh(now_ms) {
            return false;
        }
        match (self.geo_anchor, query) {
            (Some(anchor), Some(query)) => zbe_geometry::haversine_meters(anchor, query) <= radius_m,
            _ => true,
        }
    }

    fn eviction_score(&self, now_ms: u64) -> u64 {
        self.access_count
            .saturating_mul(now_ms.saturating_sub(self.last_access_at_ms))
    }
}

/// Options for [`ProximityCache::set`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetOptions {
    /// `None` uses the cache's default TTL
    pub ttl_ms: Option<u64>,
    pub persistent: bool,
    pub geo_anchor: Option<Point>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl_ms: None,
            persistent: true,
            geo_anchor: None,
        }
    }
}

impl SetOptions {
    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn anchored_at(mut self, anchor: Point) -> Self {
        self.geo_anchor = Some(anchor);
        self
    }
}

/// Payloads stored by the proximity monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedValue {
    Zones { zones: Vec<Zone> },
    Distance { zone_id: ZoneId, meters: f64 },
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Sum of serialized entry sizes
    pub memory_bytes: usize,
    /// `(total_accesses - entries) / total_accesses`, 0 when empty
    pub hit_ratio: f64,
    pub oldest_created_at_ms: Option<u64>,
    pub newest_created_at_ms: Option<u64>,
    pub evictions: u64,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub remaining: usize,
    pub persisted: usize,
}

// ============================================================================
// PROXIMITY CACHE
// ============================================================================

struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    next_seq: u64,
    evictions: u64,
}

impl<T: Serialize> CacheInner<T> {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            evictions: 0,
        }
    }

    fn evict_one(&mut self, now_ms: u64) {
        let victim = self
            .entries
            .values()
            .min_by_key(|entry| (entry.eviction_score(now_ms), entry.seq))
            .map(|entry| entry.key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "Evicted cache entry");
        }
    }

    /// Fresh persistent entries as a flat JSON object, sorted by key.
    fn snapshot(&self, now_ms: u64) -> (Vec<u8>, usize) {
        let persisted: BTreeMap<&str, &CacheEntry<T>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.persistent && entry.is_fresh(now_ms))
            .map(|(key, entry)| (key.as_str(), entry))
            .collect();
        let count = persisted.len();

        match serde_json::to_vec(&persisted) {
            Ok(bytes) => (bytes, count),
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache snapshot");
                (b"{}".to_vec(), 0)
            }
        }
    }
}

/// Bounded TTL + geo-relevance cache with optional persistence
pub struct ProximityCache<T, Ctx: ZbeContext> {
    context: Arc<Ctx>,
    config: CacheConfig,
    inner: Mutex<CacheInner<T>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl<T, Ctx> ProximityCache<T, Ctx>
where
    T: Clone + Serialize + DeserializeOwned,
    Ctx: ZbeContext,
{
    /// Memory-only cache; `persistent` entries are kept but never written.
    pub fn new(context: Arc<Ctx>, config: CacheConfig) -> Self {
        Self {
            context,
            config,
            inner: Mutex::new(CacheInner::empty()),
            store: None,
        }
    }

    /// Cache backed by `store`, pre-loaded from its last snapshot.
    ///
    /// An unreadable or malformed snapshot yields an empty cache.
    pub fn with_store(context: Arc<Ctx>, config: CacheConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let now = context.now_ms();
        let inner = Self::load_snapshot(store.as_ref(), now);
        if !inner.entries.is_empty() {
            info!(entries = inner.entries.len(), "Loaded cache snapshot");
        }

        Self {
            context,
            config,
            inner: Mutex::new(inner),
            store: Some(store),
        }
    }

    fn load_snapshot(store: &dyn SnapshotStore, now_ms: u64) -> CacheInner<T> {
        let mut inner = CacheInner::empty();

        let bytes = match store.load() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return inner,
            Err(e) => {
                warn!(error = %e, "Failed to read cache snapshot, starting empty");
                return inner;
            }
        };

        let loaded: HashMap<String, CacheEntry<T>> = match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Malformed cache snapshot, starting empty");
                return inner;
            }
        };

        let mut fresh: Vec<(String, CacheEntry<T>)> = loaded
            .into_iter()
            .filter(|(_, entry)| entry.is_fresh(now_ms))
            .collect();
        fresh.sort_by(|a, b| a.1.created_at_ms.cmp(&b.1.created_at_ms).then_with(|| a.0.cmp(&b.0)));

        for (key, mut entry) in fresh {
            entry.seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(key, entry);
        }
        inner
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self, bytes: &[u8]) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(bytes) {
                warn!(error = %e, "Failed to persist cache snapshot");
            }
        }
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Inserts or overwrites `key`.
    ///
    /// Inserting a new key at capacity evicts one entry first. Overwriting
    /// keeps the key's original insertion order.
    pub fn set(&self, key: impl Into<String>, payload: T, options: SetOptions) {
        let key = key.into();
        let now = self.context.now_ms();

        let snapshot = {
            let mut inner = self.lock();

            let seq = match inner.entries.get(&key) {
                Some(existing) => existing.seq,
                None => {
                    if inner.entries.len() >= self.config.capacity {
                        inner.evict_one(now);
                    }
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    seq
                }
            };

            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    key,
                    payload,
                    created_at_ms: now,
                    ttl_ms: options.ttl_ms.unwrap_or(self.config.default_ttl_ms),
                    persistent: options.persistent,
                    geo_anchor: options.geo_anchor,
                    access_count: 1,
                    last_access_at_ms: now,
                    seq,
                },
            );

            (options.persistent && self.store.is_some()).then(|| inner.snapshot(now).0)
        };

        if let Some(bytes) = snapshot {
            self.write_snapshot(&bytes);
        }
    }

    /// Payload for `key` if it is valid for `query`; invalid entries are removed.
    pub fn get(&self, key: &str, query: Option<Point>) -> Option<T> {
        let now = self.context.now_ms();
        let radius = self.config.geo_relevance_radius_m;
        let mut inner = self.lock();

        let valid = match inner.entries.get(key) {
            Some(entry) => entry.is_valid_at(now, query, radius),
            None => {
                debug!(key, "Cache miss");
                return None;
            }
        };

        if !valid {
            let removed = inner.entries.remove(key);
            debug!(key, "Cache entry stale, removed");
            let snapshot = (removed.is_some_and(|e| e.persistent) && self.store.is_some())
                .then(|| inner.snapshot(now).0);
            drop(inner);
            if let Some(bytes) = snapshot {
                self.write_snapshot(&bytes);
            }
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access_at_ms = now;
        debug!(key, access_count = entry.access_count, "Cache hit");
        Some(entry.payload.clone())
    }

    /// Validity of `entry` against the current time and `query`.
    pub fn is_valid(&self, entry: &CacheEntry<T>, query: Option<Point>) -> bool {
        entry.is_valid_at(self.context.now_ms(), query, self.config.geo_relevance_radius_m)
    }

    /// Drops expired entries and rewrites the snapshot.
    pub fn sweep(&self) -> SweepReport {
        let now = self.context.now_ms();

        let (report, bytes) = {
            let mut inner = self.lock();
            let before = inner.entries.len();
            inner.entries.retain(|_, entry| entry.is_fresh(now));
            let remaining = inner.entries.len();

            let (bytes, persisted) = inner.snapshot(now);
            let report = SweepReport {
                removed: before - remaining,
                remaining,
                persisted,
            };
            (report, bytes)
        };

        self.write_snapshot(&bytes);
        info!(
            removed = report.removed,
            remaining = report.remaining,
            persisted = report.persisted,
            "Cache sweep complete"
        );
        report
    }

    /// Removes every entry whose key matches `pattern`.
    pub fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let now = self.context.now_ms();

        let (removed, snapshot) = {
            let mut inner = self.lock();
            let before = inner.entries.len();
            let mut touched_persistent = false;
            inner.entries.retain(|key, entry| {
                let matched = pattern.is_match(key);
                touched_persistent |= matched && entry.persistent;
                !matched
            });
            let removed = before - inner.entries.len();
            (removed, touched_persistent.then(|| inner.snapshot(now).0))
        };

        if let Some(bytes) = snapshot {
            self.write_snapshot(&bytes);
        }
        debug!(pattern = %pattern, removed, "Invalidated cache entries");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let entries = inner.entries.len();
        if entries == 0 {
            return CacheStats {
                evictions: inner.evictions,
                ..CacheStats::default()
            };
        }

        let total_accesses: u64 = inner.entries.values().map(|e| e.access_count).sum();
        let memory_bytes = inner
            .entries
            .values()
            .map(|e| serde_json::to_vec(e).map(|v| v.len()).unwrap_or(0))
            .sum();
        let hit_ratio = if total_accesses == 0 {
            0.0
        } else {
            total_accesses.saturating_sub(entries as u64) as f64 / total_accesses as f64
        };

        CacheStats {
            entries,
            memory_bytes,
            hit_ratio,
            oldest_created_at_ms: inner.entries.values().map(|e| e.created_at_ms).min(),
            newest_created_at_ms: inner.entries.values().map(|e| e.created_at_ms).max(),
            evictions: inner.evictions,
        }
    }

    /// Drops every entry and the stored snapshot.
    pub fn clear(&self) {
        self.lock().entries.clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to clear cache snapshot");
            }
        }
    }

    /// Writes the snapshot now.
    pub fn flush(&self) {
        let bytes = self.lock().snapshot(self.context.now_ms()).0;
        self.write_snapshot(&bytes);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }
}

// ============================================================================
// SWEEP DAEMON
// ============================================================================

/// Periodically sweeps a shared cache until cancelled
pub struct SweepDaemon<T, Ctx: ZbeContext> {
    cache: Arc<ProximityCache<T, Ctx>>,
    interval: Duration,
}

impl<T, Ctx> SweepDaemon<T, Ctx>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
    Ctx: ZbeContext,
{
    /// Daemon using the cache's configured sweep interval
    pub fn new(cache: Arc<ProximityCache<T, Ctx>>) -> Self {
        let interval = Duration::from_millis(cache.config().sweep_interval_ms);
        Self { cache, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let context = Arc::clone(self.cache.context());
        info!(interval_ms = self.interval.as_millis() as u64, "Cache sweep daemon started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cache sweep daemon shutting down");
                    break;
                }

                _ = context.sleep(self.interval) => {
                    self.cache.sweep();
                }
            }
        }
    }
}
