//! Virtual-clock implementation of ZbeContext.

use crate::error::EnvError;
use crate::ZbeContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, Instrument};

/// Context backed by a virtual clock that only moves when told to.
///
/// Clones share the same clock, so a test can hold one handle while the
/// cache and the alert engine hold others. `sleep` parks until
/// [`advance_time`](Self::advance_time) or [`set_time`](Self::set_time)
/// reaches its deadline; it never moves the clock itself.
pub struct ManualContext {
    /// Current virtual time (nanoseconds since context creation)
    clock: Arc<watch::Sender<u64>>,
    
    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl ManualContext {
    /// Creates a new context whose virtual time 0 is 2024-01-01 00:00:00 UTC.
    pub fn new() -> Self {
        Self::with_epoch(UNIX_EPOCH + Duration::from_secs(1704067200))
    }
    
    /// Creates a new context anchored at the given wall-clock time.
    pub fn with_epoch(epoch: SystemTime) -> Self {
        let (clock, _) = watch::channel(0);
        Self {
            clock: Arc::new(clock),
            epoch,
        }
    }
    
    /// Creates an Arc-wrapped context for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
    
    /// Advances virtual time by the given duration, waking due sleepers.
    pub fn advance_time(&self, duration: Duration) {
        let step = duration.as_nanos() as u64;
        self.clock.send_modify(|time| *time = time.saturating_add(step));
    }
    
    /// Sets the virtual time to a specific value.
    ///
    /// The clock is monotonic: moving it backwards is rejected.
    pub fn set_time(&self, time_ns: u64) -> Result<(), EnvError> {
        let current = self.time_ns();
        if time_ns < current {
            return Err(EnvError::clock(format!(
                "cannot rewind virtual clock from {}ns to {}ns",
                current, time_ns
            )));
        }
        self.clock.send_modify(|time| *time = (*time).max(time_ns));
        Ok(())
    }
    
    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.clock.borrow()
    }
}

impl Default for ManualContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ManualContext {
    fn clone(&self) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl ZbeContext for ManualContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }
    
    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }
    
    async fn sleep(&self, duration: Duration) {
        let mut time = self.clock.subscribe();
        let deadline = (*time.borrow()).saturating_add(duration.as_nanos() as u64);
        // The sender lives as long as `self`, so this only returns once the deadline is reached
        let _ = time.wait_for(|&now| now >= deadline).await;
    }
    
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning task on virtual clock");
        tokio::spawn(future.instrument(tracing::debug_span!("task", name = %name)));
    }
    
    fn seed(&self) -> u64 {
        0
    }
}
