//! User feedback for fired alerts.
//!
//! Only the most urgent alert of an evaluation (the first one, since the
//! engine sorts by priority) is presented. Sinks that lack a capability
//! simply do nothing.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::zbe_alerts::{AlertLevelName, AlertLevelSpec, AlertRecord};
use crate::zones::ZoneId;

/// Title shown on system notifications
pub const NOTIFICATION_TITLE: &str = "ZBE Madrid Navigator";

/// Length of the alert tone
pub const TONE_DURATION_MS: u64 = 500;

/// Haptic and audio cues for one alert level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackProfile {
    /// Alternating vibrate/pause durations (ms)
    pub vibration_ms: Vec<u64>,
    pub tone_hz: u32,
    /// Notification stays until the user acts on it
    pub require_interaction: bool,
}

impl FeedbackProfile {
    pub fn for_level(level: &AlertLevelSpec) -> Self {
        let (vibration_ms, tone_hz): (&[u64], u32) = match level.name {
            AlertLevelName::Info => (&[100], 440),
            AlertLevelName::Warning => (&[100, 50, 100], 554),
            AlertLevelName::Danger => (&[200, 100, 200, 100, 200], 659),
            AlertLevelName::Critical => (&[300, 100, 300, 100, 300, 100, 300], 880),
        };

        Self {
            vibration_ms: vibration_ms.to_vec(),
            tone_hz,
            require_interaction: level.priority >= 3,
        }
    }
}

/// Everything a UI needs to present one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Replaces earlier notifications for the same zone
    pub tag: String,
    pub zone_id: ZoneId,
    pub color: String,
    pub profile: FeedbackProfile,
}

impl Notification {
    pub fn from_alert(alert: &AlertRecord) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: alert.message.clone(),
            tag: format!("zbe-alert-{}", alert.zone_id),
            zone_id: alert.zone_id,
            color: alert.level.color.clone(),
            profile: FeedbackProfile::for_level(&alert.level),
        }
    }
}

/// Consumer of fired alerts
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// `alerts` is ordered most urgent first and may be empty.
    fn deliver(&self, alerts: &[AlertRecord]);
}

/// Logs the primary alert.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn deliver(&self, alerts: &[AlertRecord]) {
        let Some(primary) = alerts.first() else {
            return;
        };

        if primary.level.priority >= 3 {
            warn!(
                zone = %primary.zone_id,
                level = %primary.level.name,
                distance_m = primary.distance_meters,
                pending = alerts.len(),
                "{}", primary.message
            );
        } else {
            info!(
                zone = %primary.zone_id,
                level = %primary.level.name,
                distance_m = primary.distance_meters,
                pending = alerts.len(),
                "{}", primary.message
            );
        }
    }
}

/// Forwards the primary alert to a UI task without waiting.
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end, with room for `capacity` notifications
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn deliver(&self, alerts: &[AlertRecord]) {
        let Some(primary) = alerts.first() else {
            return;
        };

        // Dropped notifications are acceptable; the next evaluation refreshes the UI
        if let Err(e) = self.tx.try_send(Notification::from_alert(primary)) {
            debug!(error = %e, "Notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zbe_alerts::AlertLevels;

    fn alert(zone: u64, level: AlertLevelName) -> AlertRecord {
        let level = AlertLevels::default().get(level).cloned().unwrap();
        AlertRecord {
            id: format!("alert_{}_0", zone),
            zone_id: ZoneId(zone),
            zone_name: "ZBE Centro".to_string(),
            distance_meters: 40.0,
            message: format!("{} alert", level.name),
            level,
            fired_at_ms: 0,
        }
    }

    #[test]
    fn test_profiles_per_level() {
        let levels = AlertLevels::default();

        let info = FeedbackProfile::for_level(levels.get(AlertLevelName::Info).unwrap());
        assert_eq!(info.vibration_ms, vec![100]);
        assert_eq!(info.tone_hz, 440);
        assert!(!info.require_interaction);

        let danger = FeedbackProfile::for_level(levels.get(AlertLevelName::Danger).unwrap());
        assert_eq!(danger.tone_hz, 659);
        assert!(danger.require_interaction);

        let critical = FeedbackProfile::for_level(levels.get(AlertLevelName::Critical).unwrap());
        assert_eq!(critical.vibration_ms.len(), 7);
        assert_eq!(critical.tone_hz, 880);
    }

    #[test]
    fn test_notification_tag_and_colour() {
        let n = Notification::from_alert(&alert(4, AlertLevelName::Warning));
        assert_eq!(n.tag, "zbe-alert-4");
        assert_eq!(n.color, "#FF9800");
        assert_eq!(n.title, NOTIFICATION_TITLE);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_primary_only() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.deliver(&[alert(2, AlertLevelName::Critical), alert(1, AlertLevelName::Info)]);
        sink.deliver(&[]);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.zone_id, ZoneId(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        sink.deliver(&[alert(1, AlertLevelName::Info)]);
        TracingSink.deliver(&[alert(1, AlertLevelName::Danger)]);
    }
}
