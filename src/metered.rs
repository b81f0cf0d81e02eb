//! Retry with metrics: the executor plus both timers and the counter listener, wired together.
//!
//! For a metric prefix `P`, each call through [`MeteredRetry`] records:
//!
//! | Meter | Kind | Recorded |
//! |---|---|---|
//! | `P` | timer | once per attempt, tagged with that attempt's exception kind |
//! | `P_retry` | timer | once per call, around every attempt and backoff sleep |
//! | `P_retries` | counter | per retried attempt, and once on success after a retry |
//! | `P_failures` | counter | once per call that exhausts its attempts |
//!
//! Metric recording never changes what the caller sees.
//!
//! ```rust
//! use std::io;
//! use std::sync::Arc;
//! use metered_retry::{CallSite, InstantSleeper, MeteredRetry, MetricsRegistry, RetryConfig};
//!
//! let registry = Arc::new(MetricsRegistry::new());
//! let retry = MeteredRetry::<io::Error>::builder(registry.clone())
//!     .config(RetryConfig::new("github_api"))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//!
//! let site = CallSite::method("GithubClient", "list_repositories");
//! let mut calls = 0;
//! let repos = retry.execute(&site, || {
//!     calls += 1;
//!     if calls == 1 {
//!         Err(io::Error::from(io::ErrorKind::TimedOut))
//!     } else {
//!         Ok(vec!["metered-retry"])
//!     }
//! });
//!
//! assert_eq!(repos.unwrap(), vec!["metered-retry"]);
//! assert_eq!(registry.exactly_one_timer("github_api_retry", &[]).unwrap().count(), 1);
//! assert_eq!(registry.find_timers("github_api", &[]).len(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::config::RetryConfig;
use crate::context::{CallSite, RetryContext};
use crate::error::{BuildError, ErrorKind, RetryError};
use crate::executor::RetryExecutor;
use crate::listener::{MetricsListener, RetryListener};
use crate::metrics::MetricsRegistry;
use crate::sleeper::{Sleeper, ThreadSleeper};
use crate::timing::TimingWrapper;

/// Fallback producing a value from the call's arguments once every attempt has failed.
pub trait Recoverer<A, T, E> {
    fn recover(&self, args: &A, error: E) -> Result<T, E>;
}

impl<A, T, E, F> Recoverer<A, T, E> for F
where
    F: Fn(&A, E) -> Result<T, E>,
{
    fn recover(&self, args: &A, error: E) -> Result<T, E> {
        self(args, error)
    }
}

pub struct MeteredRetry<E> {
    executor: RetryExecutor<E>,
    attempt_timer: TimingWrapper,
    sequence_timer: TimingWrapper,
    registry: Arc<MetricsRegistry>,
    config: RetryConfig,
}

impl<E> fmt::Debug for MeteredRetry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteredRetry")
            .field("executor", &self.executor)
            .field("metric_prefix", &self.config.metric_prefix)
            .finish()
    }
}

impl<E> Clone for MeteredRetry<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            attempt_timer: self.attempt_timer.clone(),
            sequence_timer: self.sequence_timer.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: ErrorKind> MeteredRetry<E> {
    pub fn builder(registry: Arc<MetricsRegistry>) -> MeteredRetryBuilder<E> {
        MeteredRetryBuilder::new(registry)
    }

    /// Build with the thread sleeper and no extra listeners.
    pub fn from_config(
        registry: Arc<MetricsRegistry>,
        config: &RetryConfig,
    ) -> Result<Self, BuildError> {
        Self::builder(registry).config(config.clone()).build()
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn executor(&self) -> &RetryExecutor<E> {
        &self.executor
    }

    /// Run `operation` with retries, recording both timers and the counters.
    pub fn execute<T, F>(&self, site: &CallSite, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.execute_with_context(site, |_| operation())
    }

    /// Like [`execute`](Self::execute), but the operation sees the retry context.
    pub fn execute_with_context<T, F>(
        &self,
        site: &CallSite,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<'_, E>) -> Result<T, E>,
    {
        self.sequence_timer.time(site, || {
            self.executor
                .execute(site, |context| self.attempt_timer.time(site, || operation(context)))
        })
    }

    /// Run `operation(&args)` with retries; once attempts run out, return
    /// `recoverer.recover(&args, last_error)` instead of an exhaustion error.
    ///
    /// The failures counter is still incremented before the recoverer runs. The sequence timer
    /// is tagged `none` when recovery succeeds.
    pub fn execute_with_recoverer<A, T, F, R>(
        &self,
        site: &CallSite,
        args: A,
        mut operation: F,
        recoverer: &R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&A) -> Result<T, E>,
        R: Recoverer<A, T, E> + ?Sized,
    {
        self.sequence_timer.time(site, || {
            self.executor.execute_with_recovery(
                site,
                |_| self.attempt_timer.time(site, || operation(&args)),
                |_, error| recoverer.recover(&args, error),
            )
        })
    }
}

/// Builder for [`MeteredRetry`].
pub struct MeteredRetryBuilder<E> {
    registry: Arc<MetricsRegistry>,
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    listeners: Vec<Arc<dyn RetryListener<E>>>,
}

impl<E: ErrorKind> MeteredRetryBuilder<E> {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registry,
            config: RetryConfig::default(),
            sleeper: Arc::new(ThreadSleeper),
            listeners: Vec::new(),
        }
    }

    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Extra listener, notified after the metrics listener.
    pub fn with_listener<L>(mut self, listener: L) -> Self
    where
        L: RetryListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Validate the config and wire the timers, the executor and the counter listener.
    pub fn build(self) -> Result<MeteredRetry<E>, BuildError> {
        let config = self.config;
        config.validate()?;

        let metrics = MetricsListener::new(self.registry.clone(), &config.metric_prefix);
        let mut executor = RetryExecutor::builder()
            .max_attempts(config.max_attempts)
            .backoff(config.backoff()?)
            .with_shared_sleeper(self.sleeper)
            .with_listener(metrics);
        for listener in self.listeners {
            executor = executor.with_shared_listener(listener);
        }

        let attempt_timer = TimingWrapper::new(
            self.registry.clone(),
            config.attempt_timer_name(),
            &config.exported_percentiles,
            "Duration of a single attempt",
        );
        let sequence_timer = TimingWrapper::new(
            self.registry.clone(),
            config.sequence_timer_name(),
            &config.exported_percentiles,
            "Duration of a call including every attempt and backoff",
        );

        Ok(MeteredRetry {
            executor: executor.build()?,
            attempt_timer,
            sequence_timer,
            registry: self.registry,
            config,
        })
    }
}
