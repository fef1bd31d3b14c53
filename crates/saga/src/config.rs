//! Saga timeouts and tuning, loaded from environment variables.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use common::ProductId;
use domain::DEFAULT_TOTAL_PROGRESS;
use durable::RetryPolicy;

/// Saga configuration.
///
/// Reads from environment variables:
/// - `PAYMENT_TIMEOUT_SECS`: how long checkout waits for the payment webhook (default: `60`)
/// - `APPROVAL_TIMEOUT_SECS`: how long an issue waits for a decision (default: `172800`, 48h)
/// - `CHECKOUT_TIMEOUT_SECS`: how long HTTP callers wait for a saga event (default: `30`)
/// - `DISPATCH_TICKS`: progress steps of a new order, at least 1 (default: `10`)
/// - `DISPATCH_INTERVAL_MS`: pause before each dispatch step (default: `1000`)
/// - `RESTOCK_LEVEL`: inventory after a restock (default: `100`)
/// - `SCAN_REPORTS_DIR`: directory the scan saga reads reports from (default: `reports`)
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub product_id: ProductId,
    pub payment_timeout: Duration,
    pub approval_timeout: Duration,
    pub checkout_timeout: Duration,
    /// Progress a new order starts with; dispatch ticks it down to 0.
    pub dispatch_ticks: NonZeroU32,
    pub dispatch_interval: Duration,
    pub restock_level: u32,
    pub scan_reports_dir: PathBuf,
    /// Applied to compensation steps, which must not give up on the first error.
    pub compensation_retry: RetryPolicy,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payment_timeout: env_secs("PAYMENT_TIMEOUT_SECS").unwrap_or(defaults.payment_timeout),
            approval_timeout: env_secs("APPROVAL_TIMEOUT_SECS")
                .unwrap_or(defaults.approval_timeout),
            checkout_timeout: env_secs("CHECKOUT_TIMEOUT_SECS")
                .unwrap_or(defaults.checkout_timeout),
            // NonZeroU32 refuses "0", which falls back to the default.
            dispatch_ticks: env_parse("DISPATCH_TICKS").unwrap_or(defaults.dispatch_ticks),
            dispatch_interval: env_parse("DISPATCH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.dispatch_interval),
            restock_level: env_parse("RESTOCK_LEVEL").unwrap_or(defaults.restock_level),
            scan_reports_dir: std::env::var("SCAN_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| defaults.scan_reports_dir.clone()),
            ..defaults
        }
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_dispatch(mut self, ticks: NonZeroU32, interval: Duration) -> Self {
        self.dispatch_ticks = ticks;
        self.dispatch_interval = interval;
        self
    }

    pub fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            product_id: ProductId::new(1),
            payment_timeout: Duration::from_secs(60),
            approval_timeout: Duration::from_secs(48 * 60 * 60),
            checkout_timeout: Duration::from_secs(30),
            dispatch_ticks: NonZeroU32::new(DEFAULT_TOTAL_PROGRESS).unwrap_or(NonZeroU32::MIN),
            dispatch_interval: Duration::from_secs(1),
            restock_level: 100,
            scan_reports_dir: PathBuf::from("reports"),
            compensation_retry: RetryPolicy::new(5, Duration::from_millis(100), 2.0),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert_eq!(config.payment_timeout, Duration::from_secs(60));
        assert_eq!(config.approval_timeout, Duration::from_secs(172_800));
        assert_eq!(config.dispatch_ticks.get(), 10);
        assert_eq!(config.restock_level, 100);
        assert_eq!(config.compensation_retry.max_attempts, 5);
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = SagaConfig::default()
            .with_payment_timeout(Duration::from_millis(50))
            .with_dispatch(NonZeroU32::new(3).unwrap(), Duration::from_millis(5));
        assert_eq!(config.payment_timeout, Duration::from_millis(50));
        assert_eq!(config.dispatch_ticks.get(), 3);
        assert_eq!(config.dispatch_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_zero_dispatch_ticks_fall_back_to_default() {
        // SAFETY: no other test in this crate reads DISPATCH_TICKS.
        unsafe { std::env::set_var("DISPATCH_TICKS", "0") };
        let zero = SagaConfig::from_env();
        unsafe { std::env::set_var("DISPATCH_TICKS", "4") };
        let four = SagaConfig::from_env();
        unsafe { std::env::remove_var("DISPATCH_TICKS") };

        assert_eq!(zero.dispatch_ticks.get(), 10);
        assert_eq!(four.dispatch_ticks.get(), 4);
    }
}
