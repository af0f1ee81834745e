//! Core environment context trait for the ZBE engine.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the proximity engine can
/// run against the wall clock in production and against a virtual clock
/// when replaying recorded or synthetic drives.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Replay/Test**: `ManualContext` - a virtual clock advanced explicitly
#[async_trait]
pub trait ZbeContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    fn now(&self) -> Duration;
    
    /// Returns the wall-clock time.
    ///
    /// Cache entries and cooldowns are stamped with this clock so that a
    /// persisted snapshot stays meaningful across restarts.
    fn system_time(&self) -> SystemTime;
    
    /// Returns wall-clock milliseconds since the Unix epoch.
    ///
    /// A clock set before the epoch reads as 0.
    fn now_ms(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
    
    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In replay: advances the virtual clock
    async fn sleep(&self, duration: Duration);
    
    /// Spawns a background task (e.g. the cache sweep).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
    
    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
