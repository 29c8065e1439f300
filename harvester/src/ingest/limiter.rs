use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use harvest_core::config::OriginConfig;
use harvest_core::{Error, Result};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Per-domain dispatcher limits for stream requests: at most `parallelism`
/// in flight, and (optionally) no more than one start per `min_interval`.
pub struct DomainLimiter {
    permits: Semaphore,
    pacing: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl DomainLimiter {
    pub fn new(parallelism: usize, min_interval: Duration) -> Self {
        let pacing = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            permits: Semaphore::new(parallelism.max(1)),
            pacing,
        }
    }

    pub fn from_config(config: &OriginConfig) -> Self {
        Self::new(
            config.parallelism,
            Duration::from_millis(config.min_interval_ms),
        )
    }

    /// Waits for a free slot, then for the pacing quota. The slot is held
    /// until the returned permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("domain limiter closed: {}", e)))?;
        if let Some(pacing) = &self.pacing {
            pacing.until_ready().await;
        }
        Ok(permit)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
