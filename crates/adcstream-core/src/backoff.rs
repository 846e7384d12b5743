//! Bounded exponential backoff for recoverable driver errors

use embassy_time::Duration;

use crate::config::BackoffConfig;

/// Tracks consecutive failures and hands out doubling delays
///
/// ```rust
/// use adcstream_core::backoff::Backoff;
/// use adcstream_core::config::BackoffConfig;
/// use embassy_time::Duration;
///
/// let mut backoff = Backoff::new(BackoffConfig { initial_ms: 10, max_ms: 25, max_consecutive_failures: 3 });
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(25)));
/// assert_eq!(backoff.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Register a failure and return how long to wait before retrying,
    /// or `None` once the failure budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.failures >= self.config.max_consecutive_failures {
            return None;
        }

        let factor = 1u64.checked_shl(self.failures).unwrap_or(u64::MAX);
        let delay_ms = u64::from(self.config.initial_ms)
            .saturating_mul(factor)
            .min(u64::from(self.config.max_ms));
        self.failures += 1;

        Some(Duration::from_millis(delay_ms))
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
