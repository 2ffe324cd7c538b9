//! Retry backoff for webhook delivery.
//!
//! Strategies only answer "how long until the next attempt"; the per-event
//! attempt budget belongs to the subscription (`max_retries`).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for retry backoff strategies.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay before the next attempt, given how many attempts
    /// have already failed (at least 1).
    fn next_delay(&self, failed_attempts: u32) -> Duration;
}

/// Fixed list of delays, indexed by failed attempt.
///
/// The delay after attempt `n` is entry `n - 1`; the last entry repeats
/// once the list runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBackoff {
    pub delays: Vec<Duration>,
}

impl ScheduledBackoff {
    /// Creates a schedule from explicit delays.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    /// Creates a schedule from delays in seconds.
    pub fn from_secs(delays: impl IntoIterator<Item = u64>) -> Self {
        Self::new(delays.into_iter().map(Duration::from_secs))
    }
}

impl Default for ScheduledBackoff {
    fn default() -> Self {
        Self::from_secs([1, 5, 15])
    }
}

impl RetryStrategy for ScheduledBackoff {
    fn next_delay(&self, failed_attempts: u32) -> Duration {
        let idx = failed_attempts.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Exponential backoff retry strategy.
///
/// Delay increases exponentially: base * 2^failed_attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Base delay.
    pub base: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl ExponentialBackoff {
    /// Creates a minute-scale backoff: 2, 4, 8... minutes.
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600), // 1 hour
            jitter: 0.0,
        }
    }

    /// Sets the base delay.
    pub fn base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, failed_attempts: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(failed_attempts);
        let delay = self.base.saturating_mul(multiplier);
        let delay = std::cmp::min(delay, self.max_delay);

        if self.jitter > 0.0 {
            let jitter_range = (delay.as_millis() as f64 * self.jitter) as u64;
            let jitter_offset = rand::thread_rng().gen_range(0..=jitter_range);
            delay + Duration::from_millis(jitter_offset)
        } else {
            delay
        }
    }
}

/// Backoff selected by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Scheduled(ScheduledBackoff),
    Exponential(ExponentialBackoff),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Scheduled(ScheduledBackoff::default())
    }
}

impl RetryStrategy for BackoffPolicy {
    fn next_delay(&self, failed_attempts: u32) -> Duration {
        match self {
            BackoffPolicy::Scheduled(s) => s.next_delay(failed_attempts),
            BackoffPolicy::Exponential(e) => e.next_delay(failed_attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let strategy = ScheduledBackoff::default();

        assert_eq!(strategy.next_delay(1), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(2), Duration::from_secs(5));
        assert_eq!(strategy.next_delay(3), Duration::from_secs(15));
        // Past the end the last delay repeats.
        assert_eq!(strategy.next_delay(7), Duration::from_secs(15));
    }

    #[test]
    fn test_empty_schedule_retries_immediately() {
        let strategy = ScheduledBackoff::new([]);
        assert_eq!(strategy.next_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = ExponentialBackoff::new();

        assert_eq!(strategy.next_delay(1), Duration::from_secs(120));
        assert_eq!(strategy.next_delay(2), Duration::from_secs(240));
        assert_eq!(strategy.next_delay(3), Duration::from_secs(480));
        assert_eq!(strategy.next_delay(10), Duration::from_secs(3600));
    }

    #[test]
    fn test_exponential_jitter_stays_in_range() {
        let strategy = ExponentialBackoff::new()
            .base(Duration::from_secs(1))
            .jitter(0.5);

        for _ in 0..50 {
            let delay = strategy.next_delay(2);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_policy_delegates() {
        let policy = BackoffPolicy::Exponential(ExponentialBackoff::new().base(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(1), Duration::from_secs(4));
        assert_eq!(BackoffPolicy::default().next_delay(2), Duration::from_secs(5));
    }
}
