//! Search/create retry policy with optional exponential backoff.
//!
//! A channel that fails to find or create its server-side counterpart asks the
//! policy how long to wait before searching again. The default policy retries
//! forever without delay.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for channel search and creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of consecutive failed attempts, `None` for unbounded.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays, at least 1.0.
    pub multiplier: f64,
    /// Adds up to 50% random jitter to each non-zero delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Retries forever without delay.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Exponential backoff between `initial` and `max`, doubling each time.
    pub fn exponential(max_attempts: Option<u32>, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: initial.as_millis() as u64,
            max_backoff_ms: max.as_millis() as u64,
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the attempts
    /// are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let computed = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = computed.min(self.max_backoff_ms.max(self.initial_backoff_ms) as f64) as u64;
        let total = if self.jitter && capped > 1 {
            capped.saturating_add(rand::thread_rng().gen_range(0..capped / 2))
        } else {
            capped
        };
        Some(Duration::from_millis(total))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}
