//! Bounded exponential backoff with jitter
//!
//! Used by every queue retry loop. The loops themselves never give up;
//! only the spacing between attempts grows.

use std::time::Duration;

use rand::Rng;

use crate::config::Timing;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn from_timing(timing: &Timing) -> Self {
        Self::new(timing.retry_delay, timing.max_retry_delay)
    }

    /// Consecutive failures recorded since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return how long to wait before retrying
    ///
    /// The ceiling doubles with each consecutive failure up to `max`; the
    /// returned delay is drawn uniformly from the upper half of it.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self
            .base
            .saturating_mul(1u32 << self.failures.min(16))
            .min(self.max);
        self.failures = self.failures.saturating_add(1);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Forget past failures after a success
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
