//! Proximity Monitor - wires the engines to the environment context.
//!
//! ```text
//! Position ──► ProximityMonitor ──► AlertEngine ──► sinks + EventLog
//!                   │     ▲
//!                   ▼     │ memoized distances / zone list
//!              ProximityCache ◄──► SnapshotStore
//! ```
//!
//! Each position is processed synchronously. The only background work is
//! the cache sweep, spawned through the context by [`ProximityMonitor::start`].
//!
//! # Usage
//!
//! ```ignore
//! use zbe_core::{EngineConfig, ProximityMonitor};
//! use zbe_core::zones::StaticZoneSource;
//! use zbe_env::TokioContext;
//!
//! let monitor = ProximityMonitor::new(TokioContext::shared(), EngineConfig::default());
//! monitor.start();
//! let zones = monitor.load_zones(&StaticZoneSource::madrid()).await?;
//! let alerts = monitor.process_position(&position, &zones);
//! monitor.shutdown();
//! ```

use h3o::CellIndex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbe_env::{Position, SessionId, ZbeContext};

use crate::config::EngineConfig;
use crate::error::ZoneError;
use crate::event_log::{Event, EventLog, SessionReport};
use crate::feedback::AlertSink;
use crate::snapshot::SnapshotStore;
use crate::zbe_alerts::{AlertEngine, AlertRecord};
use crate::zbe_cache::{CacheStats, CachedValue, ProximityCache, SetOptions, SweepDaemon};
use crate::zbe_geometry::Point;
use crate::zones::{self, Zone, ZoneId, ZoneSource};

/// Cache key of the current zone list
pub const ZONES_CACHE_KEY: &str = "zones:all";

/// Matches every zone-list key
pub const ZONES_KEY_PATTERN: &str = "^zones:";

/// Cache key of a memoized boundary distance
pub fn distance_key(zone_id: ZoneId, cell: CellIndex) -> String {
    format!("distance:{}:{}", zone_id, cell)
}

/// Where the user is relative to the known zones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub nearest_zone: Option<ZoneId>,
    pub nearest_zone_name: Option<String>,
    /// Distance to the nearest zone's centroid
    pub nearest_distance_m: Option<f64>,
    pub inside: Vec<ZoneId>,
}

/// Proximity monitor generic over the environment context.
pub struct ProximityMonitor<Ctx: ZbeContext> {
    context: Arc<Ctx>,
    config: EngineConfig,
    cache: Arc<ProximityCache<CachedValue, Ctx>>,
    alerts: AlertEngine<Ctx>,
    events: Mutex<EventLog>,
    sinks: Vec<Box<dyn AlertSink>>,
    shutdown: CancellationToken,
}

impl<Ctx: ZbeContext> ProximityMonitor<Ctx> {
    /// Monitor with a memory-only cache.
    pub fn new(context: Arc<Ctx>, config: EngineConfig) -> Self {
        let cache = ProximityCache::new(Arc::clone(&context), config.cache.clone());
        Self::assemble(context, config, cache)
    }

    /// Monitor whose cache persists to `store` and is warm-started from it.
    pub fn with_store(context: Arc<Ctx>, config: EngineConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let cache = ProximityCache::with_store(Arc::clone(&context), config.cache.clone(), store);
        Self::assemble(context, config, cache)
    }

    fn assemble(context: Arc<Ctx>, config: EngineConfig, cache: ProximityCache<CachedValue, Ctx>) -> Self {
        // Seeded contexts get a reproducible session id
        let session_id = match context.seed() {
            0 => SessionId::new(),
            seed => SessionId::from_seed(seed),
        };
        let alerts = AlertEngine::new(Arc::clone(&context), config.alert_levels.clone(), config.cooldown_ms);
        let events = EventLog::new(session_id, context.now_ms());

        info!(
            environment = %config.environment,
            session = %session_id,
            "Proximity monitor created"
        );

        Self {
            context,
            config,
            cache: Arc::new(cache),
            alerts,
            events: Mutex::new(events),
            sinks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Adds a consumer for fired alerts.
    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ProximityCache<CachedValue, Ctx>> {
        &self.cache
    }

    pub fn alert_engine(&self) -> &AlertEngine<Ctx> {
        &self.alerts
    }

    fn events(&self) -> MutexGuard<'_, EventLog> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one position through the pipeline and returns the fired alerts.
    ///
    /// Invalid coordinates are logged and produce no alerts.
    pub fn process_position(&self, position: &Position, zones: &[Zone]) -> Vec<AlertRecord> {
        if let Err(e) = position.validate() {
            warn!(error = %e, "Ignoring position");
            return Vec::new();
        }

        let point = Point::from(position);
        let cell = point.to_cell(self.config.bucket_resolution());
        let alerts = self
            .alerts
            .evaluate_with(point, zones, |zone| self.zone_distance(point, cell, zone));

        let now = self.context.now_ms();
        {
            let mut events = self.events();
            events.record_location(position, now);
            for alert in &alerts {
                events.record_alert(alert);
                events.record_approach(alert.zone_id, alert.distance_meters, point, now);
                if zones.iter().any(|z| z.id == alert.zone_id && z.contains(point)) {
                    events.record_entry(alert.zone_id, now);
                }
            }
        }

        if !alerts.is_empty() {
            for sink in &self.sinks {
                sink.deliver(&alerts);
            }
        }
        alerts
    }

    /// Boundary distance, memoized per zone and H3 cell.
    fn zone_distance(&self, point: Point, cell: Option<CellIndex>, zone: &Zone) -> f64 {
        let Some(cell) = cell else {
            return zone.distance_to_boundary(point);
        };

        let key = distance_key(zone.id, cell);
        if let Some(CachedValue::Distance { meters, .. }) = self.cache.get(&key, Some(point)) {
            return meters;
        }

        let meters = zone.distance_to_boundary(point);
        if meters.is_finite() {
            self.cache.set(
                key,
                CachedValue::Distance {
                    zone_id: zone.id,
                    meters,
                },
                SetOptions::default()
                    .ttl(self.config.cache.geo_ttl_ms)
                    .persistent(false)
                    .anchored_at(point),
            );
        }
        meters
    }

    /// Zone list from the cache, or fetched from `source` and cached.
    pub async fn load_zones(&self, source: &dyn ZoneSource) -> Result<Vec<Zone>, ZoneError> {
        if let Some(CachedValue::Zones { zones }) = self.cache.get(ZONES_CACHE_KEY, None) {
            debug!(count = zones.len(), "Zones served from cache");
            return Ok(zones);
        }

        let zones = source.fetch_zones().await?;
        self.cache.set(
            ZONES_CACHE_KEY,
            CachedValue::Zones { zones: zones.clone() },
            SetOptions::default().ttl(self.config.zone_refresh_interval_ms),
        );
        info!(count = zones.len(), source = source.name(), "Zones loaded");
        Ok(zones)
    }

    /// Forces the next `load_zones` to fetch.
    pub fn invalidate_zones(&self) -> usize {
        match Regex::new(ZONES_KEY_PATTERN) {
            Ok(pattern) => self.cache.invalidate_by_pattern(&pattern),
            Err(e) => {
                warn!(error = %e, "Invalid zone key pattern");
                0
            }
        }
    }

    /// Nearest zone by centroid and the zones containing `position`.
    pub fn status(&self, position: &Position, zones: &[Zone]) -> MonitorStatus {
        let point = Point::from(position);
        let nearest = zones::nearest_zone(point, zones);

        MonitorStatus {
            nearest_zone: nearest.map(|(z, _)| z.id),
            nearest_zone_name: nearest.map(|(z, _)| z.name.clone()),
            nearest_distance_m: nearest.map(|(_, d)| d),
            inside: zones.iter().filter(|z| z.contains(point)).map(|z| z.id).collect(),
        }
    }

    /// Records that the user dismissed an alert.
    pub fn dismiss_alert(&self, alert: &AlertRecord) {
        let now = self.context.now_ms();
        let response_time = now.saturating_sub(alert.fired_at_ms);
        self.events().record_dismissal(&alert.id, response_time, now);
    }

    pub fn report(&self) -> SessionReport {
        self.events().report(self.context.now_ms())
    }

    /// Queued analytics events, emptying the queue.
    pub fn drain_events(&self) -> Vec<Event> {
        self.events().drain()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Spawns the periodic cache sweep.
    pub fn start(&self) {
        let daemon = SweepDaemon::new(Arc::clone(&self.cache));
        self.context.spawn("cache-sweep", daemon.run(self.shutdown.clone()));
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the sweep, persists the cache and closes the session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cache.flush();
        self.events().end_session(self.context.now_ms());
        info!(entries = self.cache.len(), "Proximity monitor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::ChannelSink;
    use crate::snapshot::MemorySnapshotStore;
    use crate::zones::{fallback_zones, StaticZoneSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use zbe_env::ManualContext;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ZoneSource for CountingSource {
        async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(fallback_zones())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn sol(ctx: &ManualContext) -> Position {
        Position::new(40.4168, -3.7038, 10.0, ctx.now_ms())
    }

    #[test]
    fn test_position_near_centro_fires_once() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());
        let zones = fallback_zones();

        let alerts = monitor.process_position(&sol(&ctx), &zones);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].zone_id, ZoneId(1));

        ctx.advance_time(Duration::from_secs(5));
        assert!(monitor.process_position(&sol(&ctx), &zones).is_empty());

        let report = monitor.report();
        assert_eq!(report.alerts.total, 1);
        assert_eq!(report.zones.entered[&ZoneId(1)].count, 1);
    }

    #[test]
    fn test_distances_memoized_per_cell() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());
        let zones = fallback_zones();
        let position = sol(&ctx);

        monitor.process_position(&position, &zones);
        let cell = Point::from(&position)
            .to_cell(monitor.config().bucket_resolution())
            .unwrap();
        for zone in &zones {
            assert!(monitor.cache().contains_key(&distance_key(zone.id, cell)));
        }

        monitor.process_position(&position, &zones);
        assert!(monitor.cache_stats().hit_ratio > 0.0);
    }

    #[test]
    fn test_invalid_position_is_ignored() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());
        let bad = Position::new(f64::NAN, -3.7, 5.0, 0);

        assert!(monitor.process_position(&bad, &fallback_zones()).is_empty());
        assert!(monitor.cache().is_empty());
    }

    #[tokio::test]
    async fn test_load_zones_is_cached_until_invalidated() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx), EngineConfig::default());
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };

        assert_eq!(monitor.load_zones(&source).await.unwrap().len(), 3);
        assert_eq!(monitor.load_zones(&source).await.unwrap().len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert_eq!(monitor.invalidate_zones(), 1);
        monitor.load_zones(&source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restart_serves_zones_from_snapshot() {
        let ctx = ManualContext::new();
        let store = Arc::new(MemorySnapshotStore::new());

        let first = ProximityMonitor::with_store(Arc::new(ctx.clone()), EngineConfig::default(), store.clone());
        first.load_zones(&StaticZoneSource::madrid()).await.unwrap();
        first.shutdown();

        ctx.advance_time(Duration::from_secs(60));
        let second = ProximityMonitor::with_store(Arc::new(ctx), EngineConfig::default(), store);
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };
        let zones = second.load_zones(&source).await.unwrap();
        let ids: Vec<ZoneId> = zones.iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![ZoneId(1), ZoneId(2), ZoneId(3)]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sink_receives_primary_alert() {
        let ctx = ManualContext::new();
        let (sink, mut rx) = ChannelSink::channel(8);
        let monitor =
            ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default()).with_sink(Box::new(sink));

        monitor.process_position(&sol(&ctx), &fallback_zones());
        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.zone_id, ZoneId(1));
        assert_eq!(notification.tag, "zbe-alert-1");
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());
        monitor.start();
        tokio::task::yield_now().await;

        let alerts = monitor.process_position(&sol(&ctx), &fallback_zones());
        ctx.advance_time(Duration::from_secs(2));
        monitor.dismiss_alert(&alerts[0]);

        monitor.shutdown();
        assert!(monitor.is_shutdown());

        let report = monitor.report();
        assert_eq!(report.alerts.dismissal_rate, 100.0);
        assert!(monitor
            .drain_events()
            .iter()
            .any(|e| matches!(e.kind, crate::event_log::EventKind::SessionEnd { .. })));
    }

    #[tokio::test]
    async fn test_started_sweep_does_not_move_the_clock() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());
        let zones = fallback_zones();
        let before = ctx.now_ms();

        assert_eq!(monitor.process_position(&sol(&ctx), &zones).len(), 1);
        monitor.start();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(ctx.now_ms(), before);
        assert!(monitor.process_position(&sol(&ctx), &zones).is_empty());
        assert!(monitor.alert_engine().is_suppressed(ZoneId(1), crate::AlertLevelName::Info));

        ctx.advance_time(Duration::from_millis(30_001));
        assert_eq!(monitor.process_position(&sol(&ctx), &zones).len(), 1);
        monitor.shutdown();
    }

    #[test]
    fn test_status_reports_nearest_and_inside() {
        let ctx = ManualContext::new();
        let monitor = ProximityMonitor::new(Arc::new(ctx.clone()), EngineConfig::default());

        let status = monitor.status(&sol(&ctx), &fallback_zones());
        assert_eq!(status.nearest_zone, Some(ZoneId(1)));
        assert_eq!(status.inside, vec![ZoneId(1)]);
        assert!(status.nearest_distance_m.unwrap() < 1000.0);
    }
}
