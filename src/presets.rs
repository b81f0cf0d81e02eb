//! Ready-made retry configurations for common call shapes.
//!
//! Each preset returns a [`RetryConfig`] that can be tweaked further before building:
//!
//! ```rust
//! use std::sync::Arc;
//! use metered_retry::{presets, MeteredRetry, MetricsRegistry};
//!
//! let config = presets::remote_api("payments_api").with_max_attempts(4);
//! let registry = Arc::new(MetricsRegistry::new());
//! let retry = MeteredRetry::<std::io::Error>::from_config(registry, &config).unwrap();
//! assert_eq!(retry.executor().max_attempts(), 4);
//! ```
//!
//! ## Available Presets
//!
//! - [`remote_api`]: third-party HTTP/RPC calls (5 attempts, 500ms doubling up to 30s)
//! - [`fast_fail`]: latency-sensitive lookups (2 attempts, 10ms, capped at 100ms)

use std::time::Duration;

use crate::config::RetryConfig;

const REMOTE_API_ATTEMPTS: usize = 5;
const REMOTE_API_INITIAL_MILLIS: u64 = 500;
const REMOTE_API_MAX_SECS: u64 = 30;

const FAST_FAIL_ATTEMPTS: usize = 2;
const FAST_FAIL_INITIAL_MILLIS: u64 = 10;
const FAST_FAIL_MAX_MILLIS: u64 = 100;

/// Conservative retries for remote dependencies that recover on the order of seconds.
pub fn remote_api(metric_prefix: impl Into<String>) -> RetryConfig {
    RetryConfig::new(metric_prefix)
        .with_max_attempts(REMOTE_API_ATTEMPTS)
        .with_initial_backoff(Duration::from_millis(REMOTE_API_INITIAL_MILLIS))
        .with_max_backoff(Duration::from_secs(REMOTE_API_MAX_SECS))
}

/// One quick retry, for callers that would rather fail than wait.
pub fn fast_fail(metric_prefix: impl Into<String>) -> RetryConfig {
    RetryConfig::new(metric_prefix)
        .with_max_attempts(FAST_FAIL_ATTEMPTS)
        .with_initial_backoff(Duration::from_millis(FAST_FAIL_INITIAL_MILLIS))
        .with_max_backoff(Duration::from_millis(FAST_FAIL_MAX_MILLIS))
}
