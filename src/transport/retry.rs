//! Exponential backoff policy for batch delivery

use crate::config::TransportConfig;
use backon::ExponentialBuilder;
use std::time::Duration;

/// Retry policy: up to `max_retries` retries after the first attempt, the
/// n-th retry waiting `base_delay * factor^n` capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub factor: f32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: TransportConfig::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs_f64(TransportConfig::DEFAULT_RETRY_DELAY_SECONDS),
            factor: TransportConfig::DEFAULT_BACKOFF_FACTOR,
            max_delay: Duration::from_secs_f64(TransportConfig::DEFAULT_MAX_RETRY_DELAY_SECONDS),
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Policy from the transport options; values `validate` would reject
    /// fall back to the defaults.
    pub fn from_config(config: &TransportConfig) -> Self {
        let defaults = Self::default();
        let seconds = |value: Option<f64>, default: Duration| {
            value
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .unwrap_or(default)
        };
        Self {
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            base_delay: seconds(config.retry_delay_seconds, defaults.base_delay),
            factor: config
                .backoff_factor
                .filter(|f| f.is_finite() && *f >= 1.0)
                .unwrap_or(defaults.factor),
            max_delay: seconds(config.max_retry_delay_seconds, defaults.max_delay),
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff schedule consumed by `backon`
    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_retries)
    }
}
