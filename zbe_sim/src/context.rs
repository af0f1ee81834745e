//! Simulation context implementing ZbeContext for deterministic drives.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use zbe_env::{ManualContext, ZbeContext};

/// Simulation context backed by a virtual clock and a master seed.
///
/// Time only moves through [`advance_time`](Self::advance_time) or
/// `sleep`, so cache TTLs and alert cooldowns expire exactly when the
/// scenario says they do.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Shared virtual clock
    clock: ManualContext,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock: ManualContext::new(),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance_time(duration);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.clock.time_ns()
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            clock: self.clock.clone(),
        }
    }
}

#[async_trait]
impl ZbeContext for SimContext {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn system_time(&self) -> SystemTime {
        self.clock.system_time()
    }

    async fn sleep(&self, duration: Duration) {
        // In simulation, sleep advances virtual time
        self.clock.sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.clock.spawn(name, future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.time_ns(), 1_500_000_000);
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx1.now_ms(), ctx2.now_ms());
    }
}
