//! Call identity and per-call retry state.

use std::fmt;
use std::time::{Duration, Instant};

/// Label reported for grouping tags the caller did not set.
pub const UNSET_LABEL: &str = "none";

/// Explicit identity of a retried operation.
///
/// `name` is the logical operation label; `class_name` and `method_name` are grouping labels that
/// end up as the `class` and `method` metric tags. Unset grouping labels are reported as `"none"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    name: String,
    class_name: String,
    method_name: String,
}

impl CallSite {
    /// Call site identified only by a logical label.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: UNSET_LABEL.to_string(),
            method_name: UNSET_LABEL.to_string(),
        }
    }

    /// Call site for a method; the logical name defaults to `Class.method`.
    pub fn method(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let method_name = method_name.into();
        Self { name: format!("{class_name}.{method_name}"), class_name, method_name }
    }

    /// Override the logical name (the retry label).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}::{})", self.name, self.class_name, self.method_name)
    }
}

/// Mutable state for one retry sequence.
///
/// Created fresh by the executor for every call and dropped when the call resolves.
/// `attempt_count` is the number of failed attempts so far; `last_error` is the error that
/// triggered the most recent backoff, which the operation can inspect on its next attempt.
#[derive(Debug)]
pub struct RetryContext<'a, E> {
    site: &'a CallSite,
    attempt_count: usize,
    last_error: Option<E>,
    started: Instant,
}

impl<'a, E> RetryContext<'a, E> {
    pub(crate) fn new(site: &'a CallSite) -> Self {
        Self { site, attempt_count: 0, last_error: None, started: Instant::now() }
    }

    pub fn call_site(&self) -> &'a CallSite {
        self.site
    }

    pub fn name(&self) -> &str {
        self.site.name()
    }

    pub fn class_name(&self) -> &str {
        self.site.class_name()
    }

    pub fn method_name(&self) -> &str {
        self.site.method_name()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&E> {
        self.last_error.as_ref()
    }

    /// Time since the sequence started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn record_failure(&mut self) -> usize {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub(crate) fn set_last_error(&mut self, error: E) {
        self.last_error = Some(error);
    }
}
