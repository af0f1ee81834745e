//! The "ALERTS" Engine - Threshold Levels and Per-Zone Cooldowns
//!
//! Maps a distance to an alert level and decides whether an alert for a
//! (zone, level) pair may fire again.
//!
//! Level selection walks the configured list in declaration order and takes
//! the FIRST level whose threshold covers the distance. With the default
//! loosest-first order (info 1000 m before critical 50 m) every distance
//! under 1 km selects `info`; configure a tightest-first list to get
//! escalating levels.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use zbe_env::ZbeContext;

use crate::zbe_geometry::{self, Point};
use crate::zones::{Zone, ZoneId};

/// Minimum time between two alerts for the same zone and level (ms)
pub const DEFAULT_COOLDOWN_MS: u64 = 30_000;

// ============================================================================
// ALERT LEVELS
// ============================================================================

/// Closed set of alert level names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevelName {
    Info,
    Warning,
    Danger,
    Critical,
}

impl AlertLevelName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevelName::Info => "info",
            AlertLevelName::Warning => "warning",
            AlertLevelName::Danger => "danger",
            AlertLevelName::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One alert level: fires when the distance is at most `threshold_meters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLevelSpec {
    pub name: AlertLevelName,
    pub threshold_meters: f64,
    /// Higher is more urgent
    pub priority: u8,
    /// Display colour, `#RRGGBB`
    pub color: String,
}

impl AlertLevelSpec {
    pub fn new(name: AlertLevelName, threshold_meters: f64, priority: u8, color: &str) -> Self {
        Self {
            name,
            threshold_meters,
            priority,
            color: color.to_string(),
        }
    }
}

/// Ordered list of alert levels. Order decides which level wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertLevels(Vec<AlertLevelSpec>);

impl Default for AlertLevels {
    fn default() -> Self {
        Self::with_thresholds(1000.0, 500.0, 200.0, 50.0)
    }
}

impl AlertLevels {
    pub fn new(levels: Vec<AlertLevelSpec>) -> Self {
        Self(levels)
    }

    /// Default names, priorities and colours with custom thresholds,
    /// in the default info, warning, danger, critical order.
    pub fn with_thresholds(info: f64, warning: f64, danger: f64, critical: f64) -> Self {
        Self(vec![
            AlertLevelSpec::new(AlertLevelName::Info, info, 1, "#2196F3"),
            AlertLevelSpec::new(AlertLevelName::Warning, warning, 2, "#FF9800"),
            AlertLevelSpec::new(AlertLevelName::Danger, danger, 3, "#F44336"),
            AlertLevelSpec::new(AlertLevelName::Critical, critical, 4, "#9C27B0"),
        ])
    }

    /// First level in declaration order whose threshold covers `distance`.
    ///
    /// NaN and infinite distances never match.
    pub fn select(&self, distance: f64) -> Option<&AlertLevelSpec> {
        self.0.iter().find(|level| distance <= level.threshold_meters)
    }

    pub fn get(&self, name: AlertLevelName) -> Option<&AlertLevelSpec> {
        self.0.iter().find(|level| level.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertLevelSpec> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// ALERT RECORDS
// ============================================================================

/// An alert that fired. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// `alert_{zone_id}_{fired_at_ms}`
    pub id: String,
    pub zone_id: ZoneId,
    pub zone_name: String,
    /// Unrounded boundary distance
    pub distance_meters: f64,
    pub level: AlertLevelSpec,
    pub fired_at_ms: u64,
    pub message: String,
}

/// User-facing text for an alert, with the distance in whole meters.
pub fn build_message(zone: &Zone, distance: f64, level: &AlertLevelSpec) -> String {
    let meters = distance.round();
    match level.name {
        AlertLevelName::Critical => format!("¡MUY CERCA! Estás a {}m de {}", meters, zone.name),
        AlertLevelName::Danger => format!("¡ATENCIÓN! Te acercas a {} ({}m)", zone.name, meters),
        AlertLevelName::Warning => format!("Precaución: {} a {}m", zone.name, meters),
        AlertLevelName::Info => format!("ZBE detectada: {} a {}m", zone.name, meters),
    }
}

// ============================================================================
// ALERT ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CooldownKey {
    zone_id: ZoneId,
    level: AlertLevelName,
}

/// Turns distances into alerts, rate limited per (zone, level).
pub struct AlertEngine<Ctx: ZbeContext> {
    context: Arc<Ctx>,
    levels: AlertLevels,
    cooldown_ms: u64,
    /// Last fire time per (zone, level); entries are never removed
    last_fired: Mutex<HashMap<CooldownKey, u64>>,
}

impl<Ctx: ZbeContext> AlertEngine<Ctx> {
    pub fn new(context: Arc<Ctx>, levels: AlertLevels, cooldown_ms: u64) -> Self {
        Self {
            context,
            levels,
            cooldown_ms,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Engine with the default levels and a 30 s cooldown
    pub fn with_defaults(context: Arc<Ctx>) -> Self {
        Self::new(context, AlertLevels::default(), DEFAULT_COOLDOWN_MS)
    }

    pub fn levels(&self) -> &AlertLevels {
        &self.levels
    }

    pub fn select_level(&self, distance: f64) -> Option<&AlertLevelSpec> {
        self.levels.select(distance)
    }

    /// Alerts for `position` against every zone, most urgent first.
    pub fn evaluate(&self, position: Point, zones: &[Zone]) -> Vec<AlertRecord> {
        self.evaluate_with(position, zones, |zone| {
            zbe_geometry::distance_to_boundary(position, &zone.polygon)
        })
    }

    /// Like [`evaluate`](Self::evaluate) with a caller-supplied distance.
    ///
    /// `distance_fn` runs for every zone before the cooldown map is locked,
    /// so it may consult other locked state (e.g. the proximity cache).
    pub fn evaluate_with<F>(&self, position: Point, zones: &[Zone], mut distance_fn: F) -> Vec<AlertRecord>
    where
        F: FnMut(&Zone) -> f64,
    {
        let candidates: Vec<(&Zone, f64, &AlertLevelSpec)> = zones
            .iter()
            .filter_map(|zone| {
                let distance = distance_fn(zone);
                self.levels.select(distance).map(|level| (zone, distance, level))
            })
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let now = self.context.now_ms();
        let mut alerts = Vec::with_capacity(candidates.len());
        {
            let mut last_fired = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
            for (zone, distance, level) in candidates {
                let key = CooldownKey {
                    zone_id: zone.id,
                    level: level.name,
                };
                let cool = last_fired
                    .get(&key)
                    .map_or(true, |&fired| now.saturating_sub(fired) > self.cooldown_ms);

                if !cool {
                    debug!(zone = %zone.id, level = %level.name, "Alert suppressed by cooldown");
                    continue;
                }

                last_fired.insert(key, now);
                alerts.push(AlertRecord {
                    id: format!("alert_{}_{}", zone.id, now),
                    zone_id: zone.id,
                    zone_name: zone.name.clone(),
                    distance_meters: distance,
                    level: level.clone(),
                    fired_at_ms: now,
                    message: build_message(zone, distance, level),
                });
            }
        }

        // sort_by is stable: equal priorities keep zone order
        alerts.sort_by(|a, b| b.level.priority.cmp(&a.level.priority));

        if !alerts.is_empty() {
            debug!(
                lat = position.lat,
                lng = position.lng,
                fired = alerts.len(),
                "Alerts fired"
            );
        }
        alerts
    }

    /// Whether an alert for this pair would currently be held back.
    pub fn is_suppressed(&self, zone_id: ZoneId, level: AlertLevelName) -> bool {
        let now = self.context.now_ms();
        let last_fired = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        last_fired
            .get(&CooldownKey { zone_id, level })
            .is_some_and(|&fired| now.saturating_sub(fired) <= self.cooldown_ms)
    }

    /// Number of (zone, level) pairs that have ever fired
    pub fn cooldown_len(&self) -> usize {
        self.last_fired.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zbe_env::ManualContext;

    fn zone(id: u64, name: &str) -> Zone {
        Zone {
            id: ZoneId(id),
            name: name.to_string(),
            municipality: "Madrid".to_string(),
            zone_type: "Zona de Bajas Emisiones".to_string(),
            restrictions: String::new(),
            polygon: vec![
                Point::new(40.00, -3.00),
                Point::new(40.00, -3.01),
                Point::new(40.01, -3.01),
                Point::new(40.01, -3.00),
                Point::new(40.00, -3.00),
            ],
            source: "test".to_string(),
        }
    }

    fn tightest_first() -> AlertLevels {
        let defaults = AlertLevels::default();
        let mut levels: Vec<AlertLevelSpec> = defaults.iter().cloned().collect();
        levels.reverse();
        AlertLevels::new(levels)
    }

    #[test]
    fn test_select_level_is_first_match_in_order() {
        let levels = AlertLevels::default();
        assert_eq!(levels.select(0.0).unwrap().name, AlertLevelName::Info);
        assert_eq!(levels.select(30.0).unwrap().name, AlertLevelName::Info);
        assert_eq!(levels.select(1000.0).unwrap().name, AlertLevelName::Info);
        assert!(levels.select(1000.1).is_none());
        assert!(levels.select(f64::NAN).is_none());
        assert!(levels.select(f64::INFINITY).is_none());

        let escalating = tightest_first();
        assert_eq!(escalating.select(30.0).unwrap().name, AlertLevelName::Critical);
        assert_eq!(escalating.select(300.0).unwrap().name, AlertLevelName::Warning);
    }

    #[test]
    fn test_cooldown_sequence() {
        let ctx = Arc::new(ManualContext::new());
        let engine = AlertEngine::with_defaults(ctx.clone());
        let zones = vec![zone(1, "ZBE Test")];

        let fired = engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0);
        assert_eq!(fired.len(), 1);
        assert!(engine.is_suppressed(ZoneId(1), AlertLevelName::Info));

        ctx.advance_time(Duration::from_secs(10));
        assert!(engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0).is_empty());

        ctx.advance_time(Duration::from_secs(21));
        let fired = engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(engine.cooldown_len(), 1);
    }

    #[test]
    fn test_cooldown_boundary_is_strict() {
        let ctx = Arc::new(ManualContext::new());
        let engine = AlertEngine::with_defaults(ctx.clone());
        let zones = vec![zone(1, "ZBE Test")];

        assert_eq!(engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0).len(), 1);
        ctx.advance_time(Duration::from_millis(30_000));
        assert!(engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0).is_empty());
        ctx.advance_time(Duration::from_millis(1));
        assert_eq!(engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0).len(), 1);
    }

    #[test]
    fn test_square_ring_inside_fires_info() {
        let ctx = Arc::new(ManualContext::new());
        let engine = AlertEngine::with_defaults(ctx.clone());
        let zones = vec![zone(7, "ZBE Cuadrado")];

        let alerts = engine.evaluate(Point::new(40.005, -3.005), &zones);
        assert_eq!(alerts.len(), 1);

        let alert = &alerts[0];
        assert_eq!(alert.level.name, AlertLevelName::Info);
        assert!((alert.distance_meters - 425.9).abs() < 1.0);
        assert_eq!(alert.id, format!("alert_7_{}", ctx.now_ms()));
        assert_eq!(alert.message, "ZBE detectada: ZBE Cuadrado a 426m");
    }

    #[test]
    fn test_alerts_sorted_by_priority_stable() {
        let ctx = Arc::new(ManualContext::new());
        let engine = AlertEngine::new(ctx, tightest_first(), DEFAULT_COOLDOWN_MS);
        let zones = vec![zone(1, "A"), zone(2, "B"), zone(3, "C"), zone(4, "D")];

        let alerts = engine.evaluate_with(Point::new(40.0, -3.0), &zones, |z| match z.id.0 {
            1 => 600.0,
            2 => 30.0,
            3 => 300.0,
            _ => 700.0,
        });

        let order: Vec<u64> = alerts.iter().map(|a| a.zone_id.0).collect();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_levels_have_independent_cooldowns() {
        let ctx = Arc::new(ManualContext::new());
        let engine = AlertEngine::new(ctx.clone(), tightest_first(), DEFAULT_COOLDOWN_MS);
        let zones = vec![zone(1, "A")];

        let first = engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 300.0);
        assert_eq!(first[0].level.name, AlertLevelName::Warning);

        ctx.advance_time(Duration::from_secs(10));
        let second = engine.evaluate_with(Point::new(40.0, -3.0), &zones, |_| 30.0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].level.name, AlertLevelName::Critical);
        assert!(engine.is_suppressed(ZoneId(1), AlertLevelName::Warning));
    }

    #[test]
    fn test_no_zones_no_alerts() {
        let engine = AlertEngine::with_defaults(Arc::new(ManualContext::new()));
        assert!(engine.evaluate(Point::new(40.0, -3.0), &[]).is_empty());
        assert_eq!(engine.cooldown_len(), 0);
    }

    #[test]
    fn test_message_templates() {
        let z = zone(1, "ZBE Centro");
        let levels = AlertLevels::default();
        let msg = |name, d| build_message(&z, d, levels.get(name).unwrap());

        assert_eq!(msg(AlertLevelName::Critical, 42.4), "¡MUY CERCA! Estás a 42m de ZBE Centro");
        assert_eq!(msg(AlertLevelName::Danger, 150.5), "¡ATENCIÓN! Te acercas a ZBE Centro (151m)");
        assert_eq!(msg(AlertLevelName::Warning, 480.0), "Precaución: ZBE Centro a 480m");
        assert_eq!(msg(AlertLevelName::Info, 999.9), "ZBE detectada: ZBE Centro a 1000m");
    }
}
