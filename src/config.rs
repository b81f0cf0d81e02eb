//! Plain-data configuration for a metered retry.
//!
//! [`RetryConfig`] carries every knob as a public field so it can be filled from a file, a
//! preset or code. Nothing is checked until [`RetryConfig::validate`] (or a builder consuming the
//! config) runs.
//!
//! With the `serde` feature the struct is (de)serializable; durations are whole milliseconds
//! and missing fields fall back to [`RetryConfig::default`]:
//!
//! ```json
//! { "max_attempts": 5, "initial_backoff_ms": 250, "metric_prefix": "github_api" }
//! ```

use std::time::Duration;

use crate::backoff::{
    ExponentialRandomBackoff, DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER,
};
use crate::error::BuildError;
use crate::jitter::{Jitter, DEFAULT_JITTER_MAX, DEFAULT_JITTER_MIN};
use crate::metrics::key::{FAILURES_SUFFIX, RETRIES_SUFFIX, SEQUENCE_SUFFIX};
use crate::metrics::registry::is_valid_name;
use crate::policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_METRIC_PREFIX: &str = "retry";
pub const DEFAULT_PERCENTILES: [f64; 7] = [0.5, 0.75, 0.8, 0.9, 0.95, 0.99, 0.999];

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    /// Total attempts, initial call included.
    pub max_attempts: usize,
    #[cfg_attr(feature = "serde", serde(rename = "initial_backoff_ms", with = "duration_ms"))]
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Lower bound (inclusive) of the jitter factor.
    pub jitter_min: f64,
    /// Upper bound (exclusive) of the jitter factor.
    pub jitter_max: f64,
    #[cfg_attr(feature = "serde", serde(rename = "max_backoff_ms", with = "duration_ms"))]
    pub max_backoff: Duration,
    /// Base name of the four meter families.
    pub metric_prefix: String,
    /// Quantiles published by both timers.
    pub exported_percentiles: Vec<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_INTERVAL,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
            max_backoff: DEFAULT_MAX_INTERVAL,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            exported_percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

impl RetryConfig {
    pub fn new(metric_prefix: impl Into<String>) -> Self {
        Self { metric_prefix: metric_prefix.into(), ..Self::default() }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub fn with_metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metric_prefix = prefix.into();
        self
    }

    pub fn with_percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.exported_percentiles = percentiles.into();
        self
    }

    /// Check every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), BuildError> {
        self.policy()?;
        self.backoff()?;
        if !is_valid_name(&self.metric_prefix) {
            return Err(BuildError::InvalidMetricPrefix(self.metric_prefix.clone()));
        }
        let out_of_range = |q: &f64| q.is_nan() || *q <= 0.0 || *q > 1.0;
        if let Some(bad) = self.exported_percentiles.iter().copied().find(out_of_range) {
            return Err(BuildError::InvalidPercentile(bad));
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<RetryPolicy, BuildError> {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn backoff(&self) -> Result<ExponentialRandomBackoff, BuildError> {
        let jitter = Jitter::new(self.jitter_min, self.jitter_max)?;
        Ok(ExponentialRandomBackoff::new(self.initial_backoff)
            .with_multiplier(self.backoff_multiplier)?
            .with_max(self.max_backoff)?
            .with_jitter(jitter))
    }

    /// Attempt timer name (`<prefix>`).
    pub fn attempt_timer_name(&self) -> String {
        self.metric_prefix.clone()
    }

    /// Sequence timer name (`<prefix>_retry`).
    pub fn sequence_timer_name(&self) -> String {
        format!("{}{SEQUENCE_SUFFIX}", self.metric_prefix)
    }

    pub fn retries_counter_name(&self) -> String {
        format!("{}{RETRIES_SUFFIX}", self.metric_prefix)
    }

    pub fn failures_counter_name(&self) -> String {
        format!("{}{FAILURES_SUFFIX}", self.metric_prefix)
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
