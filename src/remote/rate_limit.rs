//! Interval gate and exponential backoff for outbound remote calls.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default permitted request rate.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// Blocking rate limiter shared by every call against one endpoint.
///
/// Deterministic, no jitter.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    backoff_unit: Duration,
    last_permit: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_SECOND)
    }
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            backoff_unit: Duration::from_secs(1),
            last_permit: Mutex::new(None),
        }
    }

    /// A limiter that never sleeps.
    pub fn unthrottled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            backoff_unit: Duration::ZERO,
            last_permit: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the minimum interval since the previous permit has passed.
    pub fn wait(&self) {
        // Holding the lock across the sleep serializes concurrent callers.
        let mut last = self.last_permit.lock();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    /// Delay before retry number `attempt` (0-indexed): `2^attempt` units.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * 2u32.saturating_pow(attempt.min(16))
    }
}
