//! Error types for the ZBE core engines.
//!
//! The geometry kernel, cache and alert engine are total; these errors only
//! surface at the boundaries (storage, zone ingestion, configuration).

use thiserror::Error;

/// Errors raised by the cache's persistence boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    StorageError(String),
    
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors raised while obtaining zone records.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("Failed to read zone data: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("Malformed zone data: {0}")]
    Parse(#[from] serde_json::Error),
    
    #[error("Zone fetch failed: {0}")]
    Fetch(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),
}
