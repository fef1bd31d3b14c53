//! Runtime configuration loaded from environment variables.

use std::time::Duration;

/// Retry policy applied to a step before its failure is recorded.
///
/// The delay before attempt `n + 1` is `interval * backoff_rate^(n - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_rate: f64,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub fn new(max_attempts: u32, interval: Duration, backoff_rate: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff_rate,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Returns the delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.interval.mul_f64(self.backoff_rate.max(1.0).powi(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Durable runtime configuration.
///
/// Reads from environment variables:
/// - `WORKER_CONCURRENCY`: queued workflows allowed to run at once (default: `10`)
/// - `WAIT_POLL_INTERVAL_MS`: how often a waiter re-checks the journal (default: `1000`)
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub default_retry: RetryPolicy,
}

impl RuntimeConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.worker_concurrency),
            poll_interval: std::env::var("WAIT_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            default_retry: defaults.default_retry,
        }
    }

    /// Sets the worker concurrency.
    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers.max(1);
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the retry policy used by `run_step`.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 10,
            poll_interval: Duration::from_millis(1000),
            default_retry: RetryPolicy::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.worker_concurrency, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.default_retry.max_attempts, 1);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, 1.0);
        assert_eq!(policy.max_attempts, 1);
    }
}
