//! Error types for the ZBE environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A position fix from the location provider is unusable
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
    
    /// Clock manipulation was rejected (e.g. rewinding a virtual clock)
    #[error("Clock error: {0}")]
    ClockError(String),
}

impl EnvError {
    /// Creates an invalid position error.
    pub fn invalid_position(msg: impl Into<String>) -> Self {
        Self::InvalidPosition(msg.into())
    }
    
    /// Creates a clock error.
    pub fn clock(msg: impl Into<String>) -> Self {
        Self::ClockError(msg.into())
    }
}
