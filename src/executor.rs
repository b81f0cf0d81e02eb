//! Blocking retry loop.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial call + retries); every `Err` counts.
//! - After a failed attempt that leaves attempts remaining, listeners see
//!   [`RetryEvent::Retrying`], then the calling thread sleeps for
//!   `backoff.next_delay(attempt_count)`.
//! - After the final failed attempt, listeners see [`RetryEvent::Exhausted`]; no sleep follows.
//!   The error is returned as [`RetryError::Exhausted`], or handed to the recoverer.
//! - On success, listeners see [`RetryEvent::Succeeded`] and the value is returned.
//!
//! The operation receives the sequence's [`RetryContext`]: `attempt_count` is the number of
//! failures so far and `last_error` the error that caused the latest backoff.
//!
//! ```rust
//! use std::io;
//! use std::time::Duration;
//! use metered_retry::{CallSite, ExponentialRandomBackoff, InstantSleeper, RetryExecutor};
//!
//! let executor = RetryExecutor::<io::Error>::builder()
//!     .max_attempts(3)
//!     .backoff(ExponentialRandomBackoff::new(Duration::from_millis(10)))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//!
//! let site = CallSite::new("flaky");
//! let value = executor.execute(&site, |ctx| {
//!     if ctx.attempt_count() < 2 {
//!         Err(io::Error::from(io::ErrorKind::ConnectionReset))
//!     } else {
//!         Ok(ctx.attempt_count())
//!     }
//! });
//! assert_eq!(value.unwrap(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::backoff::{BackoffStrategy, ExponentialRandomBackoff};
use crate::context::{CallSite, RetryContext};
use crate::error::{BuildError, ErrorKind, RetryError};
use crate::listener::{RetryEvent, RetryListener};
use crate::policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::sleeper::{Sleeper, ThreadSleeper};

/// Retry loop combining a policy, a backoff strategy, a sleeper and lifecycle listeners.
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    backoff: Arc<dyn BackoffStrategy>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Vec<Arc<dyn RetryListener<E>>>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy,
            backoff: self.backoff.clone(),
            sleeper: self.sleeper.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .field("sleeper", &self.sleeper)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// How a sequence ended before any recovery.
enum Outcome<T, E> {
    Succeeded(T),
    Exhausted { attempts: usize, error: E },
}

impl<E: ErrorKind> RetryExecutor<E> {
    pub fn builder() -> RetryExecutorBuilder<E> {
        RetryExecutorBuilder::new()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn max_attempts(&self) -> usize {
        self.policy.max_attempts()
    }

    /// Run `operation` until it succeeds or the policy gives up.
    pub fn execute<T, F>(&self, site: &CallSite, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<'_, E>) -> Result<T, E>,
    {
        let mut context = RetryContext::new(site);
        match self.run(&mut context, operation) {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Exhausted { attempts, error } => {
                Err(RetryError::Exhausted { attempts, source: error })
            }
        }
    }

    /// Like [`execute`](Self::execute), but hands the final error to `recover` once attempts
    /// run out.
    ///
    /// The `Exhausted` event is emitted before `recover` runs. A failing recoverer yields
    /// [`RetryError::Recovery`].
    pub fn execute_with_recovery<T, F, R>(
        &self,
        site: &CallSite,
        operation: F,
        recover: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<'_, E>) -> Result<T, E>,
        R: FnOnce(&RetryContext<'_, E>, E) -> Result<T, E>,
    {
        let mut context = RetryContext::new(site);
        match self.run(&mut context, operation) {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Exhausted { attempts, error } => match recover(&context, error) {
                Ok(value) => {
                    tracing::info!(
                        call_site = %site,
                        attempts,
                        "recovered after exhausting retries"
                    );
                    Ok(value)
                }
                Err(source) => {
                    tracing::warn!(
                        call_site = %site,
                        attempts,
                        error_kind = %source.error_kind(),
                        "recovery failed"
                    );
                    Err(RetryError::Recovery { attempts, source })
                }
            },
        }
    }

    fn run<T, F>(&self, context: &mut RetryContext<'_, E>, mut operation: F) -> Outcome<T, E>
    where
        F: FnMut(&RetryContext<'_, E>) -> Result<T, E>,
    {
        loop {
            match operation(&*context) {
                Ok(value) => {
                    self.emit(&RetryEvent::Succeeded { context: &*context });
                    return Outcome::Succeeded(value);
                }
                Err(error) => {
                    let attempts = context.record_failure();
                    if !self.policy.should_retry(attempts) {
                        tracing::warn!(
                            call_site = %context.call_site(),
                            attempts,
                            elapsed_ms = context.elapsed().as_millis() as u64,
                            error_kind = %error.error_kind(),
                            "retry attempts exhausted"
                        );
                        self.emit(&RetryEvent::Exhausted { context: &*context, error: &error });
                        return Outcome::Exhausted { attempts, error };
                    }

                    let delay = self.backoff.next_delay(attempts);
                    tracing::debug!(
                        call_site = %context.call_site(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = %error.error_kind(),
                        "attempt failed; retrying"
                    );
                    self.emit(&RetryEvent::Retrying { context: &*context, error: &error, delay });
                    self.sleeper.sleep(delay);
                    context.set_last_error(error);
                }
            }
        }
    }

    fn emit(&self, event: &RetryEvent<'_, E>) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

/// Builder for [`RetryExecutor`].
pub struct RetryExecutorBuilder<E> {
    max_attempts: usize,
    backoff: Arc<dyn BackoffStrategy>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Vec<Arc<dyn RetryListener<E>>>,
}

impl<E: ErrorKind> RetryExecutorBuilder<E> {
    /// Defaults: 3 attempts, [`ExponentialRandomBackoff::default`], [`ThreadSleeper`], no
    /// listeners.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Arc::new(ExponentialRandomBackoff::default()),
            sleeper: Arc::new(ThreadSleeper),
            listeners: Vec::new(),
        }
    }

    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff<B>(mut self, backoff: B) -> Self
    where
        B: BackoffStrategy + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Add a listener. Listeners are notified in registration order.
    pub fn with_listener<L>(mut self, listener: L) -> Self
    where
        L: RetryListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn with_shared_listener(mut self, listener: Arc<dyn RetryListener<E>>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<RetryExecutor<E>, BuildError> {
        Ok(RetryExecutor {
            policy: RetryPolicy::new(self.max_attempts)?,
            backoff: self.backoff,
            sleeper: self.sleeper,
            listeners: self.listeners,
        })
    }
}

impl<E: ErrorKind> Default for RetryExecutorBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
