//! Time source for the controller. Every wait the controller performs goes
//! through [`Clock::after`], so tests can substitute a clock that records
//! the requested delays instead of sleeping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Completes once `duration` has elapsed. Dropping the returned future
    /// disposes the scheduled wait.
    async fn after(&self, duration: Duration);
}

/// Production clock backed by the tokio timer wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn after(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
