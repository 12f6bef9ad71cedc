//! Fixed-interval gate shared by every upstream call.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

/// Default spacing between two upstream requests.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Serializes callers so that consecutive acquisitions are at least one
/// period apart, regardless of which task issues them.
///
/// The first acquisition completes immediately. Must be constructed inside
/// a Tokio runtime.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Mutex<Interval>,
    period: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the given period (clamped to at least 1 ms).
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Mutex::new(interval),
            period,
        }
    }

    /// Waits for the next slot.
    pub async fn acquire(&self) {
        self.interval.lock().await.tick().await;
    }

    /// Configured spacing.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}
