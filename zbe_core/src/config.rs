//! Engine configuration.
//!
//! Every knob has a default matching the deployed Madrid navigator, so
//! `EngineConfig::default()` is a working production setup. Per-environment
//! presets only change alert thresholds and the zone refresh interval.

use h3o::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

use crate::error::ConfigError;
use crate::zbe_alerts::{AlertLevels, DEFAULT_COOLDOWN_MS};
use crate::snapshot::DEFAULT_STORAGE_KEY;
use crate::zones::MADRID_GEOPORTAL_URL;

/// Environment variable selecting the preset
pub const ENV_VAR: &str = "ZBE_ENV";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl Environment {
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Testing => "testing",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "testing" | "test" => Ok(Environment::Testing),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Configuration for the proximity cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries (default: 100)
    pub capacity: usize,

    /// TTL applied when a `set` does not specify one (default: 1 hour)
    pub default_ttl_ms: u64,

    /// TTL for position-dependent results such as distances (default: 5 minutes)
    pub geo_ttl_ms: u64,

    /// Geo-anchored entries are stale beyond this distance from the query (default: 50 km)
    pub geo_relevance_radius_m: f64,

    /// Period of the background sweep (default: 5 minutes)
    pub sweep_interval_ms: u64,

    /// Key the snapshot is stored under
    pub storage_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_ttl_ms: 3_600_000,
            geo_ttl_ms: 300_000,
            geo_relevance_radius_m: 50_000.0,
            sweep_interval_ms: 300_000,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub environment: Environment,

    /// Ordered alert levels; the first matching level wins
    pub alert_levels: AlertLevels,

    /// Minimum time between repeats of the same zone/level alert (default: 30 s)
    pub cooldown_ms: u64,

    /// H3 resolution of the distance memoization buckets (default: 12, ~9 m edges)
    pub distance_bucket_resolution: u8,

    /// How long a fetched zone list stays cached (default: 1 hour)
    pub zone_refresh_interval_ms: u64,

    /// MapServer queried for zones
    pub geoportal_url: String,

    /// Verbose diagnostics; see [`EngineConfig::log_level`]
    pub debug: bool,

    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            alert_levels: AlertLevels::default(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            distance_bucket_resolution: 12,
            zone_refresh_interval_ms: 3_600_000,
            geoportal_url: MADRID_GEOPORTAL_URL.to_string(),
            debug: false,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Preset for the given environment.
    pub fn for_environment(environment: Environment) -> Self {
        let base = Self::default();
        match environment {
            Environment::Production => base,
            Environment::Development => Self {
                environment,
                // Wider radii so desk testing triggers alerts
                alert_levels: AlertLevels::with_thresholds(2000.0, 1000.0, 500.0, 100.0),
                zone_refresh_interval_ms: 300_000,
                debug: true,
                ..base
            },
            Environment::Testing => Self {
                environment,
                alert_levels: AlertLevels::with_thresholds(5000.0, 2000.0, 1000.0, 500.0),
                zone_refresh_interval_ms: 60_000,
                debug: true,
                ..base
            },
        }
    }

    /// Preset selected by `ZBE_ENV`; development when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match std::env::var(ENV_VAR) {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Development,
        };
        Ok(Self::for_environment(environment))
    }

    /// Loads a JSON config; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Log level for subscribers: DEBUG when `debug` is set.
    pub fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    /// H3 resolution for distance buckets, clamped to a valid value.
    pub fn bucket_resolution(&self) -> Resolution {
        Resolution::try_from(self.distance_bucket_resolution).unwrap_or(Resolution::Twelve)
    }
}
