//! Scenario runner - executes deterministic drive scenarios.

use crate::context::SimContext;
use crate::exporter::{FrameAlert, SimExport, SimFrame};
use crate::oracle::RouteOracle;
use crate::scenarios::ScenarioId;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zbe_core::zones::{fallback_zones, StaticZoneSource};
use zbe_core::{
    AlertLevelName, AlertRecord, EngineConfig, MemorySnapshotStore, Point, ProximityMonitor, Zone,
    ZoneError, ZoneId, ZoneSource,
};
use zbe_env::ZbeContext;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Frame-by-frame replay, when requested
    pub export: Option<SimExport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Fixes run through the monitor
    pub positions_processed: u64,

    /// Fixes lost to GPS dropout
    pub dropped_fixes: u64,

    pub alerts_fired: u64,

    /// Repeats of a (zone, level) inside its cooldown
    pub cooldown_violations: u64,

    /// Batches not sorted by descending priority
    pub order_violations: u64,

    /// Ticks spent inside any zone
    pub ticks_inside: u64,

    pub max_cache_entries: usize,
    pub evictions: u64,
    pub hit_ratio: f64,

    /// Calls that reached the zone source
    pub zone_fetches: u64,
}

/// Independent check of the alert stream against the cooldown and order rules.
struct AlertAudit {
    cooldown_ms: u64,
    last_fired: HashMap<(ZoneId, AlertLevelName), u64>,
}

impl AlertAudit {
    fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            last_fired: HashMap::new(),
        }
    }

    fn observe(&mut self, alerts: &[AlertRecord], metrics: &mut ScenarioMetrics) {
        metrics.alerts_fired += alerts.len() as u64;

        if alerts.windows(2).any(|w| w[0].level.priority < w[1].level.priority) {
            metrics.order_violations += 1;
        }

        for alert in alerts {
            let key = (alert.zone_id, alert.level.name);
            if let Some(&last) = self.last_fired.get(&key) {
                if alert.fired_at_ms.saturating_sub(last) <= self.cooldown_ms {
                    metrics.cooldown_violations += 1;
                }
            }
            self.last_fired.insert(key, alert.fired_at_ms);
        }
    }
}

/// Number of fires a single always-in-range zone should produce.
fn expected_fires(fix_times_ms: &[u64], cooldown_ms: u64) -> u64 {
    let mut last: Option<u64> = None;
    let mut count = 0;
    for &t in fix_times_ms {
        if last.map_or(true, |l| t.saturating_sub(l) > cooldown_ms) {
            count += 1;
            last = Some(t);
        }
    }
    count
}

/// Zone source that counts fetches.
struct CountingSource<S> {
    inner: S,
    fetches: AtomicU64,
}

impl<S: ZoneSource> CountingSource<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            fetches: AtomicU64::new(0),
        }
    }

    fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ZoneSource> ZoneSource for CountingSource<S> {
    async fn fetch_zones(&self) -> Result<Vec<Zone>, ZoneError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_zones().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Runs drive scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// GPS fixes per second
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Record frames for export
    export: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 1,
            max_duration_secs: 120.0,
            export: false,
        }
    }

    /// Sets the fix rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Records a frame-by-frame export in the result.
    pub fn with_export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match scenario {
            ScenarioId::Approach => self.run_approach(),
            ScenarioId::Crossing => self.run_crossing(),
            ScenarioId::Loiter => self.run_loiter(),
            ScenarioId::CacheChurn => self.run_cache_churn(),
            ScenarioId::Restart => self.run_restart(),
        }
    }

    fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    fn target_ticks(&self) -> u64 {
        (self.max_duration_secs * self.tick_rate_hz as f64) as u64
    }

    fn new_export(&self, scenario: ScenarioId) -> Option<SimExport> {
        self.export.then(|| SimExport::new(scenario.name(), self.seed))
    }

    /// Feeds `ticks` fixes from `oracle` through `monitor`.
    ///
    /// Returns the timestamps of the fixes that were processed.
    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        context: &SimContext,
        monitor: &ProximityMonitor<SimContext>,
        oracle: &mut RouteOracle,
        zones: &[Zone],
        ticks: u64,
        metrics: &mut ScenarioMetrics,
        export: &mut Option<SimExport>,
    ) -> Vec<u64> {
        let dt = 1.0 / self.tick_rate_hz as f64;
        let ticks_per_sec = self.tick_rate_hz as u64;
        let sweep_every = 60 * ticks_per_sec;
        let mut audit = AlertAudit::new(monitor.config().cooldown_ms);
        let mut fix_times = Vec::new();

        for tick in 0..ticks {
            oracle.step(dt);
            context.advance_time(Duration::from_secs_f64(dt));

            let fix = oracle.fix(context.now_ms());
            let alerts = match &fix {
                Some(position) => {
                    metrics.positions_processed += 1;
                    fix_times.push(position.timestamp_ms);
                    if !monitor.status(position, zones).inside.is_empty() {
                        metrics.ticks_inside += 1;
                    }
                    monitor.process_position(position, zones)
                }
                None => {
                    metrics.dropped_fixes += 1;
                    Vec::new()
                }
            };
            audit.observe(&alerts, metrics);

            let cache_entries = monitor.cache().len();
            metrics.max_cache_entries = metrics.max_cache_entries.max(cache_entries);

            if (tick + 1) % sweep_every == 0 {
                monitor.cache().sweep();
            }

            if let Some(export) = export.as_mut() {
                if tick % ticks_per_sec == 0 || !alerts.is_empty() {
                    export.add_frame(SimFrame {
                        time_sec: oracle.time(),
                        true_position: oracle.true_position(),
                        fix,
                        alerts: alerts.iter().map(FrameAlert::from).collect(),
                        cache_entries,
                    });
                }
            }

            // Progress log every 10 seconds
            if tick % (10 * ticks_per_sec) == 0 {
                debug!(
                    "  t={:.1}s | travelled={:.0}m | alerts={} | cache={}",
                    oracle.time(),
                    oracle.travelled_m(),
                    metrics.alerts_fired,
                    cache_entries
                );
            }
        }

        let stats = monitor.cache_stats();
        metrics.evictions = stats.evictions;
        metrics.hit_ratio = stats.hit_ratio;
        fix_times
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        scenario: ScenarioId,
        passed: bool,
        total_ticks: u64,
        final_time_secs: f64,
        failure_reason: String,
        metrics: ScenarioMetrics,
        export: Option<SimExport>,
        monitor: &ProximityMonitor<SimContext>,
    ) -> ScenarioResult {
        let export = export.map(|mut e| {
            e.finalize(passed, Some(monitor.report()));
            e
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks,
            final_time_secs,
            failure_reason: (!passed).then_some(failure_reason),
            metrics,
            export,
        }
    }

    /// ZBE-001: Approach - drive towards Distrito Centro from the east.
    fn run_approach(&self) -> ScenarioResult {
        info!("ZBE-001: Approach - Distrito Centro from the east");

        let context = Arc::new(SimContext::new(self.seed));
        let monitor = ProximityMonitor::new(context.clone(), EngineConfig::default());
        let zones = fallback_zones();

        let mut oracle = RouteOracle::new(
            self.physics_seed(),
            vec![Point::new(40.4168, -3.6850), Point::new(40.4168, -3.7038)],
            10.0,
        );
        oracle.set_position_noise(5.0);

        let mut metrics = ScenarioMetrics::default();
        let mut export = self.new_export(ScenarioId::Approach);
        let ticks = self.target_ticks();
        self.drive(&context, &monitor, &mut oracle, &zones, ticks, &mut metrics, &mut export);

        let passed = metrics.alerts_fired > 0 && metrics.cooldown_violations == 0;

        info!(
            "✓ Approach complete: {} fixes, {} alerts, {} cooldown violations",
            metrics.positions_processed, metrics.alerts_fired, metrics.cooldown_violations
        );

        let reason = format!(
            "{} alerts fired, {} cooldown violations",
            metrics.alerts_fired, metrics.cooldown_violations
        );
        self.finish(ScenarioId::Approach, passed, ticks, oracle.time(), reason, metrics, export, &monitor)
    }

    /// ZBE-002: Crossing - drive straight through Distrito Centro.
    fn run_crossing(&self) -> ScenarioResult {
        info!("ZBE-002: Crossing - west to east through Distrito Centro");

        let context = Arc::new(SimContext::new(self.seed));
        let monitor = ProximityMonitor::new(context.clone(), EngineConfig::default());
        let zones = fallback_zones();

        let mut oracle = RouteOracle::new(
            self.physics_seed(),
            vec![Point::new(40.4160, -3.7200), Point::new(40.4160, -3.6850)],
            15.0,
        );
        oracle.set_position_noise(5.0);

        let mut metrics = ScenarioMetrics::default();
        let mut export = self.new_export(ScenarioId::Crossing);
        let ticks = self.target_ticks();
        self.drive(&context, &monitor, &mut oracle, &zones, ticks, &mut metrics, &mut export);

        let passed = metrics.ticks_inside > 0
            && metrics.cooldown_violations == 0
            && metrics.order_violations == 0;

        info!(
            "✓ Crossing complete: {} ticks inside, {} alerts",
            metrics.ticks_inside, metrics.alerts_fired
        );

        let reason = format!(
            "{} ticks inside, {} cooldown / {} order violations",
            metrics.ticks_inside, metrics.cooldown_violations, metrics.order_violations
        );
        self.finish(ScenarioId::Crossing, passed, ticks, oracle.time(), reason, metrics, export, &monitor)
    }

    /// ZBE-003: Loiter - parked ~340 m east of Distrito Centro.
    fn run_loiter(&self) -> ScenarioResult {
        info!("ZBE-003: Loiter - cooldown cadence beside Distrito Centro");

        let context = Arc::new(SimContext::new(self.seed));
        let config = EngineConfig::default();
        let cooldown_ms = config.cooldown_ms;
        let monitor = ProximityMonitor::new(context.clone(), config);
        let zones = fallback_zones();

        let mut oracle = RouteOracle::new(self.physics_seed(), vec![Point::new(40.4160, -3.6945)], 0.0);

        let mut metrics = ScenarioMetrics::default();
        let mut export = self.new_export(ScenarioId::Loiter);
        let ticks = self.target_ticks();
        let fix_times = self.drive(&context, &monitor, &mut oracle, &zones, ticks, &mut metrics, &mut export);

        let expected = expected_fires(&fix_times, cooldown_ms);
        let passed = metrics.alerts_fired == expected && metrics.ticks_inside == 0 && metrics.hit_ratio > 0.5;

        info!(
            "✓ Loiter complete: {} alerts (expected {}), hit ratio {:.2}",
            metrics.alerts_fired, expected, metrics.hit_ratio
        );

        let reason = format!(
            "{} alerts, expected {}; hit ratio {:.2}",
            metrics.alerts_fired, expected, metrics.hit_ratio
        );
        self.finish(ScenarioId::Loiter, passed, ticks, oracle.time(), reason, metrics, export, &monitor)
    }

    /// ZBE-004: CacheChurn - every fix lands in a new cell.
    fn run_cache_churn(&self) -> ScenarioResult {
        info!("ZBE-004: CacheChurn - 100 m/s with a 20-entry cache");

        let context = Arc::new(SimContext::new(self.seed));
        let mut config = EngineConfig::default();
        config.cache.capacity = 20;
        let capacity = config.cache.capacity;
        let monitor = ProximityMonitor::new(context.clone(), config);
        let zones = fallback_zones();

        let mut oracle = RouteOracle::new(
            self.physics_seed(),
            vec![Point::new(40.3800, -3.7800), Point::new(40.5500, -3.6000)],
            100.0,
        );
        oracle.set_position_noise(5.0);
        oracle.set_dropout(0.05);

        let mut metrics = ScenarioMetrics::default();
        let mut export = self.new_export(ScenarioId::CacheChurn);
        let ticks = self.target_ticks();
        self.drive(&context, &monitor, &mut oracle, &zones, ticks, &mut metrics, &mut export);

        let passed = metrics.evictions > 0
            && metrics.max_cache_entries <= capacity
            && metrics.cooldown_violations == 0;

        info!(
            "✓ CacheChurn complete: {} evictions, peak {} entries, {} dropped fixes",
            metrics.evictions, metrics.max_cache_entries, metrics.dropped_fixes
        );

        let reason = format!(
            "{} evictions, peak {} entries (capacity {})",
            metrics.evictions, metrics.max_cache_entries, capacity
        );
        self.finish(ScenarioId::CacheChurn, passed, ticks, oracle.time(), reason, metrics, export, &monitor)
    }

    /// ZBE-005: Restart - persist, shut down, warm-start.
    fn run_restart(&self) -> ScenarioResult {
        info!("ZBE-005: Restart - warm start from the cache snapshot");

        let context = Arc::new(SimContext::new(self.seed));
        let store = Arc::new(MemorySnapshotStore::new());
        let source = CountingSource::new(StaticZoneSource::madrid());
        let mut metrics = ScenarioMetrics::default();
        let mut export = self.new_export(ScenarioId::Restart);
        let ticks = self.target_ticks();
        let half = ticks / 2;

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Failed to build runtime: {}", e);
                return ScenarioResult {
                    scenario: ScenarioId::Restart,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    failure_reason: Some(format!("runtime: {}", e)),
                    metrics,
                    export,
                };
            }
        };

        let mut oracle = RouteOracle::new(
            self.physics_seed(),
            vec![Point::new(40.4168, -3.6850), Point::new(40.4168, -3.7038)],
            10.0,
        );
        oracle.set_position_noise(5.0);

        // Phase 1: cold start
        let first = ProximityMonitor::with_store(context.clone(), EngineConfig::default(), store.clone());
        let zones = match runtime.block_on(first.load_zones(&source)) {
            Ok(zones) => zones,
            Err(e) => {
                let reason = format!("zone load failed: {}", e);
                return self.finish(ScenarioId::Restart, false, 0, 0.0, reason, metrics, export, &first);
            }
        };
        self.drive(&context, &first, &mut oracle, &zones, half, &mut metrics, &mut export);
        first.shutdown();
        drop(first);

        context.advance_time(Duration::from_secs(60));

        // Phase 2: warm start
        let second = ProximityMonitor::with_store(context.clone(), EngineConfig::default(), store);
        let restored_entries = second.cache().len();
        let reloaded = runtime.block_on(second.load_zones(&source));
        metrics.zone_fetches = source.fetches();

        let reloaded_count = reloaded.as_ref().map(Vec::len).unwrap_or(0);
        if let Ok(zones) = &reloaded {
            self.drive(&context, &second, &mut oracle, zones, ticks - half, &mut metrics, &mut export);
        }

        let passed = metrics.zone_fetches == 1 && restored_entries == 1 && reloaded_count == zones.len();

        info!(
            "✓ Restart complete: {} fetches, {} entries restored, {} zones",
            metrics.zone_fetches, restored_entries, reloaded_count
        );

        let reason = format!(
            "{} fetches, {} restored entries, {} zones reloaded",
            metrics.zone_fetches, restored_entries, reloaded_count
        );
        self.finish(ScenarioId::Restart, passed, ticks, oracle.time(), reason, metrics, export, &second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approach_scenario() {
        let runner = ScenarioRunner::new(42).with_duration(60.0);

        let result = runner.run(ScenarioId::Approach);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.positions_processed, 60);
        assert!(result.metrics.alerts_fired > 0);
    }

    #[test]
    fn test_crossing_scenario() {
        let runner = ScenarioRunner::new(42).with_duration(120.0);

        let result = runner.run(ScenarioId::Crossing);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.ticks_inside > 0);
    }

    #[test]
    fn test_loiter_cooldown_cadence() {
        let runner = ScenarioRunner::new(42).with_duration(120.0);

        let result = runner.run(ScenarioId::Loiter);

        // Fires at t = 1, 32, 63, 94 s
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.alerts_fired, 4);
    }

    #[test]
    fn test_cache_churn_respects_capacity() {
        let runner = ScenarioRunner::new(42).with_duration(30.0);

        let result = runner.run(ScenarioId::CacheChurn);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.max_cache_entries <= 20);
    }

    #[test]
    fn test_restart_scenario() {
        let runner = ScenarioRunner::new(42).with_duration(60.0);

        let result = runner.run(ScenarioId::Restart);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.zone_fetches, 1);
    }

    #[test]
    fn test_same_seed_same_drive() {
        let runner1 = ScenarioRunner::new(7).with_duration(60.0);
        let runner2 = ScenarioRunner::new(7).with_duration(60.0);

        let result1 = runner1.run(ScenarioId::CacheChurn);
        let result2 = runner2.run(ScenarioId::CacheChurn);

        assert_eq!(result1.metrics.dropped_fixes, result2.metrics.dropped_fixes);
        assert_eq!(result1.metrics.evictions, result2.metrics.evictions);
    }

    #[test]
    fn test_export_records_frames() {
        let runner = ScenarioRunner::new(42).with_duration(30.0).with_export(true);

        let result = runner.run(ScenarioId::Approach);
        let export = result.export.unwrap();

        assert!(export.frames.len() >= 30);
        assert!(export.report.is_some());
        assert_eq!(export.scenario, "approach");
    }

    #[test]
    fn test_expected_fires_rule() {
        assert_eq!(expected_fires(&[1_000, 31_000, 31_001, 62_001], 30_000), 3);
        assert_eq!(expected_fires(&[], 30_000), 0);
    }
}
