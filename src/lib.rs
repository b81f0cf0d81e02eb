#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # metered-retry
//!
//! Blocking retries with randomized exponential backoff, instrumented with two layers of
//! metrics: per-attempt and per-call timers, plus retry and failure counters.
//!
//! ## Features
//!
//! - **Retry executor** bounded by total attempts, with an optional recoverer
//! - **Exponential backoff** with mandatory uniform jitter and a hard cap
//! - **Metrics registry** with lazily created, name+tag keyed counters and HDR timers
//! - **Lifecycle listeners** for counters, logs and test assertions
//! - **Explicit call sites** (`name`, `class`, `method`) instead of reflection
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io;
//! use std::sync::Arc;
//! use metered_retry::{CallSite, InstantSleeper, MeteredRetry, MetricsRegistry, RetryConfig};
//!
//! let registry = Arc::new(MetricsRegistry::new());
//! let retry = MeteredRetry::<io::Error>::builder(registry.clone())
//!     .config(RetryConfig::new("inventory").with_max_attempts(2))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//!
//! let site = CallSite::method("InventoryClient", "reserve");
//! let err = retry
//!     .execute(&site, || Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)))
//!     .unwrap_err();
//!
//! assert_eq!(err.attempts(), 2);
//! let failures = registry
//!     .exactly_one_counter("inventory_failures", &[("exception", "ConnectionRefused")])
//!     .unwrap();
//! assert_eq!(failures.count(), 1);
//! ```

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod jitter;
pub mod listener;
pub mod metered;
pub mod metrics;
pub mod policy;
pub mod presets;
pub mod sleeper;
pub mod timing;

// Re-exports
pub use backoff::{BackoffError, BackoffStrategy, ExponentialRandomBackoff, MAX_BACKOFF};
pub use config::RetryConfig;
pub use context::{CallSite, RetryContext};
pub use error::{short_type_name, BuildError, ErrorKind, MonitoringError, RetryError, NO_ERROR};
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use jitter::Jitter;
pub use listener::{
    LogListener, MemoryListener, MetricsListener, RecordedEvent, RetryEvent, RetryListener,
};
pub use metered::{MeteredRetry, MeteredRetryBuilder, Recoverer};
pub use metrics::{Counter, MeterId, MetricsRegistry, Timer};
pub use policy::RetryPolicy;
pub use sleeper::{InstantSleeper, Sleeper, ThreadSleeper, TrackingSleeper};
pub use timing::TimingWrapper;
