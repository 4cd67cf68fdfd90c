//! Reconnect Backoff
//!
//! Capped exponential backoff with jitter between reconnect attempts.
//! Attempts are unlimited: a feed connection never gives up while the
//! process is alive.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Reconnect backoff state for one connection.
///
/// # Example
///
/// ```rust
/// use kline_stream_bridge::infrastructure::feed::reconnect::{Backoff, BackoffConfig};
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(BackoffConfig {
///     jitter: 0.0,
///     ..BackoffConfig::default()
/// });
///
/// assert_eq!(backoff.next_delay(), Duration::from_millis(500));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(1));
///
/// backoff.reset();
/// assert_eq!(backoff.attempt(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create backoff state starting at attempt zero.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Advance to the next attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.jittered(base)
    }

    /// Number of attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures after a successful connect.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay for the zero-based `attempt`.
    #[allow(clippy::cast_precision_loss)]
    fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = initial_ms * self.config.multiplier.max(1.0).powi(exponent);

        let capped = if scaled.is_finite() { scaled.min(max_ms) } else { max_ms };
        millis_to_duration(capped)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return base;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_ms = base.as_millis() as f64;
        let spread = base_ms * self.config.jitter;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        millis_to_duration((base_ms + offset).max(1.0))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_millis(ms.max(0.0) as u64)
}
