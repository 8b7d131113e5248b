//! Injectable time source for the control loop and retry backoffs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Wall clock and sleep, abstracted so loops can be driven deterministically
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Seconds since the unix epoch
    fn unix_time(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Real time backed by tokio timers
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
pub use manual::ManualClock;
