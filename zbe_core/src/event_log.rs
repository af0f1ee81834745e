//! Session event log - what happened during a drive, in aggregate.
//!
//! Every recorded event is appended to a bounded queue (waiting for a
//! transport to [`drain`](EventLog::drain) it) and folded into running
//! metrics from which a [`SessionReport`] is built. Approach coordinates
//! are rounded to three decimals (~100 m) before they are stored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;
use zbe_env::{Position, SessionId};

use crate::zbe_alerts::{AlertLevelName, AlertRecord};
use crate::zbe_geometry::Point;
use crate::zones::ZoneId;

/// Queue length that triggers truncation
pub const MAX_QUEUED_EVENTS: usize = 100;

/// Events kept after truncation (the most recent ones)
pub const RETAINED_EVENTS: usize = 50;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd {
        duration_ms: u64,
        alerts_triggered: u64,
        zones_visited: usize,
    },
    AlertTriggered {
        zone_id: ZoneId,
        level: AlertLevelName,
        distance_meters: f64,
    },
    AlertDismissed {
        alert_id: String,
        response_time_ms: u64,
    },
    ZoneApproached {
        zone_id: ZoneId,
        distance_meters: f64,
        location: Point,
    },
    ZoneEntered {
        zone_id: ZoneId,
    },
    LocationUpdate {
        accuracy_meters: f64,
    },
}

/// A queued event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: SessionId,
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Rounds a coordinate to three decimals.
pub fn anonymize(point: Point) -> Point {
    Point::new((point.lat * 1000.0).round() / 1000.0, (point.lng * 1000.0).round() / 1000.0)
}

// ============================================================================
// REPORT
// ============================================================================

/// Alert counts per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub info: u64,
    pub warning: u64,
    pub danger: u64,
    pub critical: u64,
}

impl LevelCounts {
    fn bump(&mut self, level: AlertLevelName) {
        match level {
            AlertLevelName::Info => self.info += 1,
            AlertLevelName::Warning => self.warning += 1,
            AlertLevelName::Danger => self.danger += 1,
            AlertLevelName::Critical => self.critical += 1,
        }
    }
}

/// Visit history of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneVisits {
    pub count: u64,
    pub first_ms: u64,
    pub last_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_duration_ms: u64,
    pub alerts_triggered: u64,
    pub unique_zones_visited: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSummary {
    pub location_updates: usize,
    /// Mean reported accuracy in meters, 0 without updates
    pub average_gps_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: u64,
    pub by_level: LevelCounts,
    /// 0 without dismissals
    pub average_response_time_ms: f64,
    /// Dismissed alerts as a percentage of triggered ones
    pub dismissal_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneReport {
    pub approached: BTreeMap<ZoneId, ZoneVisits>,
    pub entered: BTreeMap<ZoneId, ZoneVisits>,
}

/// Serializable summary of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub generated_at_ms: u64,
    pub summary: SessionSummary,
    pub navigation: NavigationSummary,
    pub alerts: AlertSummary,
    pub zones: ZoneReport,
}

// ============================================================================
// EVENT LOG
// ============================================================================

/// Running mean without keeping the samples
#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    samples: u64,
}

impl RunningMean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.samples += 1;
    }

    /// 0 without samples
    fn value(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Per-session event queue and metrics
#[derive(Debug)]
pub struct EventLog {
    session_id: SessionId,
    started_at_ms: u64,
    enabled: bool,
    queue: Vec<Event>,

    alerts_total: u64,
    alerts_by_level: LevelCounts,
    dismissed: u64,
    response_time_ms: RunningMean,
    location_updates: usize,
    gps_accuracy: RunningMean,
    zones_visited: HashSet<ZoneId>,
    approached: BTreeMap<ZoneId, ZoneVisits>,
    entered: BTreeMap<ZoneId, ZoneVisits>,
}

impl EventLog {
    /// Starts a session and queues its `session_start` event.
    pub fn new(session_id: SessionId, now_ms: u64) -> Self {
        let mut log = Self {
            session_id,
            started_at_ms: now_ms,
            enabled: true,
            queue: Vec::new(),
            alerts_total: 0,
            alerts_by_level: LevelCounts::default(),
            dismissed: 0,
            response_time_ms: RunningMean::default(),
            location_updates: 0,
            gps_accuracy: RunningMean::default(),
            zones_visited: HashSet::new(),
            approached: BTreeMap::new(),
            entered: BTreeMap::new(),
        };
        log.push(EventKind::SessionStart, now_ms);
        log
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// A disabled log ignores every record call.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn push(&mut self, kind: EventKind, now_ms: u64) {
        self.queue.push(Event {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            timestamp_ms: now_ms,
            kind,
        });

        if self.queue.len() > MAX_QUEUED_EVENTS {
            let excess = self.queue.len() - RETAINED_EVENTS;
            self.queue.drain(..excess);
        }
    }

    fn visit(map: &mut BTreeMap<ZoneId, ZoneVisits>, zone_id: ZoneId, now_ms: u64) {
        let visits = map.entry(zone_id).or_insert(ZoneVisits {
            count: 0,
            first_ms: now_ms,
            last_ms: now_ms,
        });
        visits.count += 1;
        visits.last_ms = now_ms;
    }

    pub fn record_alert(&mut self, alert: &AlertRecord) {
        if !self.enabled {
            return;
        }
        self.alerts_total += 1;
        self.alerts_by_level.bump(alert.level.name);
        self.push(
            EventKind::AlertTriggered {
                zone_id: alert.zone_id,
                level: alert.level.name,
                distance_meters: alert.distance_meters,
            },
            alert.fired_at_ms,
        );
    }

    pub fn record_dismissal(&mut self, alert_id: &str, response_time_ms: u64, now_ms: u64) {
        if !self.enabled {
            return;
        }
        self.dismissed += 1;
        self.response_time_ms.add(response_time_ms as f64);
        self.push(
            EventKind::AlertDismissed {
                alert_id: alert_id.to_string(),
                response_time_ms,
            },
            now_ms,
        );
    }

    /// Records an approach; `location` is anonymized before storage.
    pub fn record_approach(&mut self, zone_id: ZoneId, distance_meters: f64, location: Point, now_ms: u64) {
        if !self.enabled {
            return;
        }
        self.zones_visited.insert(zone_id);
        Self::visit(&mut self.approached, zone_id, now_ms);
        self.push(
            EventKind::ZoneApproached {
                zone_id,
                distance_meters,
                location: anonymize(location),
            },
            now_ms,
        );
    }

    pub fn record_entry(&mut self, zone_id: ZoneId, now_ms: u64) {
        if !self.enabled {
            return;
        }
        Self::visit(&mut self.entered, zone_id, now_ms);
        self.push(EventKind::ZoneEntered { zone_id }, now_ms);
    }

    pub fn record_location(&mut self, position: &Position, now_ms: u64) {
        if !self.enabled {
            return;
        }
        self.location_updates += 1;
        if position.accuracy_meters > 0.0 {
            self.gps_accuracy.add(position.accuracy_meters);
        }
        self.push(
            EventKind::LocationUpdate {
                accuracy_meters: position.accuracy_meters,
            },
            now_ms,
        );
    }

    /// Queues the `session_end` event.
    pub fn end_session(&mut self, now_ms: u64) {
        if !self.enabled {
            return;
        }
        self.push(
            EventKind::SessionEnd {
                duration_ms: now_ms.saturating_sub(self.started_at_ms),
                alerts_triggered: self.alerts_total,
                zones_visited: self.zones_visited.len(),
            },
            now_ms,
        );
    }

    pub fn report(&self, now_ms: u64) -> SessionReport {
        SessionReport {
            session_id: self.session_id,
            generated_at_ms: now_ms,
            summary: SessionSummary {
                session_duration_ms: now_ms.saturating_sub(self.started_at_ms),
                alerts_triggered: self.alerts_total,
                unique_zones_visited: self.zones_visited.len(),
            },
            navigation: NavigationSummary {
                location_updates: self.location_updates,
                average_gps_accuracy: self.gps_accuracy.value(),
            },
            alerts: AlertSummary {
                total: self.alerts_total,
                by_level: self.alerts_by_level,
                average_response_time_ms: self.response_time_ms.value(),
                dismissal_rate: if self.alerts_total == 0 {
                    0.0
                } else {
                    self.dismissed as f64 / self.alerts_total as f64 * 100.0
                },
            },
            zones: ZoneReport {
                approached: self.approached.clone(),
                entered: self.entered.clone(),
            },
        }
    }

    /// Queued events, oldest first
    pub fn queued(&self) -> &[Event] {
        &self.queue
    }

    /// Hands every queued event to the caller and empties the queue.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zbe_alerts::AlertLevels;

    fn alert(zone: u64, level: AlertLevelName, at: u64) -> AlertRecord {
        AlertRecord {
            id: format!("alert_{}_{}", zone, at),
            zone_id: ZoneId(zone),
            zone_name: "ZBE".to_string(),
            distance_meters: 120.0,
            level: AlertLevels::default().get(level).cloned().unwrap(),
            fired_at_ms: at,
            message: String::new(),
        }
    }

    #[test]
    fn test_anonymize_rounds_to_three_decimals() {
        let p = anonymize(Point::new(40.41687, -3.70382));
        assert!((p.lat - 40.417).abs() < 1e-9);
        assert!((p.lng - -3.704).abs() < 1e-9);
    }

    #[test]
    fn test_queue_is_truncated_to_most_recent() {
        let mut log = EventLog::new(SessionId::from_seed(1), 0);
        for t in 1..=100 {
            log.record_entry(ZoneId(1), t);
        }
        // session_start + 100 entries = 101 events
        assert_eq!(log.queued().len(), RETAINED_EVENTS);
        assert_eq!(log.queued().last().unwrap().timestamp_ms, 100);
        assert_eq!(log.queued().first().unwrap().timestamp_ms, 51);
    }

    #[test]
    fn test_report_alert_metrics() {
        let mut log = EventLog::new(SessionId::from_seed(2), 1_000);
        log.record_alert(&alert(1, AlertLevelName::Info, 2_000));
        log.record_alert(&alert(1, AlertLevelName::Info, 3_000));
        log.record_alert(&alert(2, AlertLevelName::Critical, 4_000));
        log.record_alert(&alert(3, AlertLevelName::Warning, 5_000));
        log.record_dismissal("alert_1_2000", 400, 6_000);

        let report = log.report(11_000);
        assert_eq!(report.summary.session_duration_ms, 10_000);
        assert_eq!(report.alerts.total, 4);
        assert_eq!(report.alerts.by_level.info, 2);
        assert_eq!(report.alerts.by_level.critical, 1);
        assert_eq!(report.alerts.dismissal_rate, 25.0);
        assert_eq!(report.alerts.average_response_time_ms, 400.0);
    }

    #[test]
    fn test_zone_visits_track_first_and_last() {
        let mut log = EventLog::new(SessionId::from_seed(3), 0);
        let here = Point::new(40.4168, -3.7038);
        log.record_approach(ZoneId(9), 300.0, here, 10);
        log.record_approach(ZoneId(9), 100.0, here, 40);
        log.record_location(&Position::new(40.4168, -3.7038, 8.0, 40), 40);
        log.record_location(&Position::new(40.4168, -3.7038, 12.0, 50), 50);

        let report = log.report(60);
        let visits = report.zones.approached[&ZoneId(9)];
        assert_eq!(visits.count, 2);
        assert_eq!((visits.first_ms, visits.last_ms), (10, 40));
        assert_eq!(report.summary.unique_zones_visited, 1);
        assert_eq!(report.navigation.average_gps_accuracy, 10.0);

        let located = log.queued().iter().find_map(|e| match &e.kind {
            EventKind::ZoneApproached { location, .. } => Some(*location),
            _ => None,
        });
        assert_eq!(located, Some(Point::new(40.417, -3.704)));
    }

    #[test]
    fn test_navigation_averages_skip_unknown_accuracy() {
        let mut log = EventLog::new(SessionId::from_seed(6), 0);
        for t in 0..1_000u64 {
            let accuracy = if t % 2 == 0 { 4.0 } else { 0.0 };
            log.record_location(&Position::new(40.4168, -3.7038, accuracy, t), t);
        }
        log.record_alert(&alert(1, AlertLevelName::Info, 10));
        log.record_alert(&alert(2, AlertLevelName::Info, 20));
        log.record_dismissal("alert_1_10", 300, 30);
        log.record_dismissal("alert_2_20", 500, 40);

        let report = log.report(2_000);
        assert_eq!(report.navigation.location_updates, 1_000);
        assert_eq!(report.navigation.average_gps_accuracy, 4.0);
        assert_eq!(report.alerts.average_response_time_ms, 400.0);
        assert_eq!(EventLog::new(SessionId::from_seed(7), 0).report(0).navigation.average_gps_accuracy, 0.0);
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let mut log = EventLog::new(SessionId::from_seed(4), 0);
        log.set_enabled(false);
        log.record_alert(&alert(1, AlertLevelName::Info, 10));
        log.record_entry(ZoneId(1), 10);

        assert_eq!(log.report(20).alerts.total, 0);
        assert_eq!(log.queued().len(), 1);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut log = EventLog::new(SessionId::from_seed(5), 0);
        log.end_session(500);
        let events = log.drain();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].kind, EventKind::SessionEnd { duration_ms: 500, .. }));
        assert!(log.queued().is_empty());
    }
}
