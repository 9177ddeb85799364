//! Retry backoff
//!
//! ```text
//! retry_count    delay (base = 1s, max = 5m)
//! ─────────────────────────────────────────
//!      1          1s
//!      2          2s
//!      3          4s
//!     ...
//!     10          5m (capped)
//! ```
//!
//! Jitter spreads retries of a failed batch so they don't land together.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Default base delay (1 second)
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default max delay (5 minutes)
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Default jitter factor (±10%)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Exponential backoff between delivery attempts
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,

    /// 0.0 - 1.0
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Retry immediately; for tests and local runs
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay before the attempt following the `retry_count`-th failure
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 31) as u32;
        let capped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        if capped.is_zero() || self.jitter_factor.is_nan() || self.jitter_factor <= 0.0 {
            return capped;
        }

        let factor = self.jitter_factor.min(1.0);
        let jitter = rand::thread_rng().gen_range(-factor..=factor);
        capped.mul_f64(1.0 + jitter).min(self.max_delay)
    }

    /// When a message that just failed for the `retry_count`-th time may be claimed again
    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay_for(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
