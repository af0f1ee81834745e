//! Common types shared between the engine and its collaborators.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an analytics session.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
    
    /// Creates a SessionId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
    
    /// Creates a deterministic SessionId from a seed (for replay).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
    
    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", &self.0.to_string()[..8])
    }
}

/// A single fix pushed by the external location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees (WGS84)
    pub lat: f64,
    
    /// Longitude in decimal degrees (WGS84)
    pub lng: f64,
    
    /// Reported horizontal accuracy (meters, 1 sigma)
    pub accuracy_meters: f64,
    
    /// Provider timestamp (Unix milliseconds)
    pub timestamp_ms: u64,
}

impl Position {
    /// Creates a new position fix.
    pub fn new(lat: f64, lng: f64, accuracy_meters: f64, timestamp_ms: u64) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
            timestamp_ms,
        }
    }
    
    /// Checks that the coordinates are finite and inside WGS84 bounds.
    pub fn validate(&self) -> Result<(), EnvError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(EnvError::invalid_position(format!(
                "non-finite coordinates ({}, {})",
                self.lat, self.lng
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(EnvError::invalid_position(format!("latitude {} out of range", self.lat)));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(EnvError::invalid_position(format!("longitude {} out of range", self.lng)));
        }
        Ok(())
    }
}
