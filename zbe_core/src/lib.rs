//! ZBE Core - Geospatial Proximity & Alerting for Low-Emission Zones
//!
//! Turns a stream of user positions into ordered, rate-limited proximity
//! alerts against a set of polygonal low-emission zones (ZBEs):
//! 1. **Geometry**: haversine distances, ray-casting containment and
//!    nearest-edge distance over WGS84 rings
//! 2. **Cache**: TTL + geo-relevance memoization with capacity eviction and
//!    snapshot persistence
//! 3. **Alerts**: ordered threshold levels with per-(zone, level) cooldowns
//!
//! The [`ProximityMonitor`] composes the three with zone sources, feedback
//! sinks and a session event log, reading time through a
//! [`zbe_env::ZbeContext`].

pub mod config;
pub mod error;
pub mod event_log;
pub mod feedback;
pub mod monitor;
pub mod snapshot;
pub mod zbe_alerts;
pub mod zbe_cache;
pub mod zbe_geometry;
pub mod zones;

// Re-export key types for convenience
pub use config::{CacheConfig, EngineConfig, Environment};
pub use error::{CacheError, ConfigError, ZoneError};
pub use event_log::{EventLog, SessionReport};
pub use feedback::{AlertSink, ChannelSink, FeedbackProfile, Notification, TracingSink};
pub use monitor::{MonitorStatus, ProximityMonitor};
pub use snapshot::{MemorySnapshotStore, SledSnapshotStore, SnapshotStore};
pub use zbe_alerts::{AlertEngine, AlertLevelName, AlertLevelSpec, AlertLevels, AlertRecord};
pub use zbe_cache::{CacheEntry, CacheStats, CachedValue, ProximityCache, SetOptions, SweepDaemon};
pub use zbe_geometry::Point;
pub use zones::{Zone, ZoneId, ZoneSource};
