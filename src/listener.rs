//! Lifecycle events emitted by the retry executor and the listeners that consume them.
//!
//! The executor calls every registered [`RetryListener`] synchronously, on the calling thread,
//! at three points:
//!
//! - [`RetryEvent::Retrying`]: an attempt failed and another one will follow after `delay`.
//! - [`RetryEvent::Exhausted`]: the final permitted attempt failed.
//! - [`RetryEvent::Succeeded`]: an attempt returned `Ok`.
//!
//! Listeners must not fail the call. [`MetricsListener`] drives the retries/failures counters,
//! [`LogListener`] writes each event through `tracing`, and [`MemoryListener`] keeps them for
//! assertions.
//!
//! ```rust
//! use std::sync::Arc;
//! use metered_retry::listener::{MetricsListener, RetryListener};
//! use metered_retry::metrics::MetricsRegistry;
//!
//! let registry = Arc::new(MetricsRegistry::new());
//! let listener = MetricsListener::new(registry.clone(), "github_api");
//! assert_eq!(listener.retries_name(), "github_api_retries");
//! assert_eq!(listener.failures_name(), "github_api_failures");
//! # fn assert_listener<L: RetryListener<std::io::Error>>(_: &L) {}
//! # assert_listener(&listener);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::context::RetryContext;
use crate::error::{ErrorKind, MonitoringError, NO_ERROR};
use crate::metrics::key::{CounterKey, FAILURES_SUFFIX, RETRIES_SUFFIX};
use crate::metrics::MetricsRegistry;

/// One step of a retry sequence, borrowed from the executor's live state.
#[derive(Debug)]
pub enum RetryEvent<'a, E> {
    /// Attempt failed; the executor sleeps `delay` and tries again.
    Retrying { context: &'a RetryContext<'a, E>, error: &'a E, delay: Duration },
    /// Attempt failed and no attempts remain.
    Exhausted { context: &'a RetryContext<'a, E>, error: &'a E },
    /// Attempt succeeded.
    Succeeded { context: &'a RetryContext<'a, E> },
}

impl<'a, E> RetryEvent<'a, E> {
    pub fn context(&self) -> &'a RetryContext<'a, E> {
        match self {
            Self::Retrying { context, .. }
            | Self::Exhausted { context, .. }
            | Self::Succeeded { context } => context,
        }
    }

    /// The failing attempt's error; `None` for a success.
    pub fn error(&self) -> Option<&'a E> {
        match self {
            Self::Retrying { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::Succeeded { .. } => None,
        }
    }

    /// True for the event that closes a sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying { .. })
    }
}

impl<E> fmt::Display for RetryEvent<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let site = self.context().call_site();
        let attempts = self.context().attempt_count();
        match self {
            Self::Retrying { delay, .. } => {
                write!(f, "Retry::Retrying({site}, failures={attempts}, delay={delay:?})")
            }
            Self::Exhausted { .. } => write!(f, "Retry::Exhausted({site}, failures={attempts})"),
            Self::Succeeded { .. } => write!(f, "Retry::Succeeded({site}, failures={attempts})"),
        }
    }
}

/// Observer of retry lifecycle events.
pub trait RetryListener<E>: Send + Sync {
    fn on_event(&self, event: &RetryEvent<'_, E>);
}

impl<E, L> RetryListener<E> for Arc<L>
where
    L: RetryListener<E> + ?Sized,
{
    fn on_event(&self, event: &RetryEvent<'_, E>) {
        (**self).on_event(event)
    }
}

/// Updates `<prefix>_retries` and `<prefix>_failures` counters from lifecycle events.
///
/// - `Retrying`: retries counter tagged with the zero-based index of the failed attempt
///   (`attempt_count - 1`) and the error's kind.
/// - `Exhausted`: failures counter tagged with the final error's kind.
/// - `Succeeded` after at least one failure: retries counter tagged with `attempt_count` and
///   exception `none`. A first-attempt success touches no counter.
///
/// Registry errors are logged and dropped.
#[derive(Debug, Clone)]
pub struct MetricsListener {
    registry: Arc<MetricsRegistry>,
    retries_name: String,
    failures_name: String,
}

impl MetricsListener {
    pub fn new(registry: Arc<MetricsRegistry>, metric_prefix: &str) -> Self {
        let retries_name = format!("{metric_prefix}{RETRIES_SUFFIX}");
        let failures_name = format!("{metric_prefix}{FAILURES_SUFFIX}");
        let descriptions = [
            (retries_name.as_str(), "Retried attempts by attempt index and error kind"),
            (failures_name.as_str(), "Calls that exhausted every attempt"),
        ];
        for (name, help) in descriptions {
            if let Err(error) = registry.describe(name, help) {
                tracing::error!(
                    target: "metered_retry::metrics",
                    %error,
                    "failed to describe {name}"
                );
            }
        }
        Self { registry, retries_name, failures_name }
    }

    pub fn retries_name(&self) -> &str {
        &self.retries_name
    }

    pub fn failures_name(&self) -> &str {
        &self.failures_name
    }

    fn increment(&self, metric_name: &str, key: CounterKey) -> Result<(), MonitoringError> {
        self.registry.counter(key.meter_id(metric_name))?.increment();
        Ok(())
    }

    fn counter_key<E>(
        context: &RetryContext<'_, E>,
        attempt_count: Option<usize>,
        exception_kind: String,
    ) -> CounterKey {
        CounterKey {
            logical_name: context.name().to_owned(),
            class_name: context.class_name().to_owned(),
            method_name: context.method_name().to_owned(),
            attempt_count,
            exception_kind,
        }
    }
}

impl<E: ErrorKind> RetryListener<E> for MetricsListener {
    fn on_event(&self, event: &RetryEvent<'_, E>) {
        let context = event.context();
        let result = match event {
            RetryEvent::Retrying { error, .. } => {
                let attempt = context.attempt_count().saturating_sub(1);
                let kind = error.error_kind().into_owned();
                let key = Self::counter_key(context, Some(attempt), kind);
                self.increment(&self.retries_name, key)
            }
            RetryEvent::Exhausted { error, .. } => {
                let key = Self::counter_key(context, None, error.error_kind().into_owned());
                self.increment(&self.failures_name, key)
            }
            RetryEvent::Succeeded { .. } if context.attempt_count() > 0 => {
                let key = Self::counter_key(
                    context,
                    Some(context.attempt_count()),
                    NO_ERROR.to_owned(),
                );
                self.increment(&self.retries_name, key)
            }
            RetryEvent::Succeeded { .. } => Ok(()),
        };
        if let Err(error) = result {
            tracing::error!(
                target: "metered_retry::metrics",
                call_site = %context.call_site(),
                %error,
                "failed to update retry counter"
            );
        }
    }
}

/// Logs every lifecycle event at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl<E: fmt::Display> RetryListener<E> for LogListener {
    fn on_event(&self, event: &RetryEvent<'_, E>) {
        match event.error() {
            Some(error) => tracing::info!(event = %event, %error, "retry_event"),
            None => tracing::info!(event = %event, "retry_event"),
        }
    }
}

/// Owned copy of a [`RetryEvent`], as kept by [`MemoryListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Retrying { attempt_count: usize, error_kind: String, delay: Duration },
    Exhausted { attempt_count: usize, error_kind: String },
    Succeeded { attempt_count: usize },
}

impl RecordedEvent {
    pub fn attempt_count(&self) -> usize {
        match self {
            Self::Retrying { attempt_count, .. }
            | Self::Exhausted { attempt_count, .. }
            | Self::Succeeded { attempt_count } => *attempt_count,
        }
    }
}

/// Stores events in memory. Useful for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryListener {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl<E: ErrorKind> RetryListener<E> for MemoryListener {
    fn on_event(&self, event: &RetryEvent<'_, E>) {
        let attempt_count = event.context().attempt_count();
        let recorded = match event {
            RetryEvent::Retrying { error, delay, .. } => RecordedEvent::Retrying {
                attempt_count,
                error_kind: error.error_kind().into_owned(),
                delay: *delay,
            },
            RetryEvent::Exhausted { error, .. } => {
                let error_kind = error.error_kind().into_owned();
                RecordedEvent::Exhausted { attempt_count, error_kind }
            }
            RetryEvent::Succeeded { .. } => RecordedEvent::Succeeded { attempt_count },
        };
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(recorded);
    }
}
