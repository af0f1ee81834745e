//! Production implementation of ZbeContext using Tokio.

use crate::ZbeContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, Instrument};

/// Production context backed by Tokio and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
    
    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ZbeContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
    
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
    
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
    
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning task");
        tokio::spawn(future.instrument(tracing::info_span!("task", name = %name)));
    }
    
    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}
