//! Duration measurement for one timer family.
//!
//! A [`TimingWrapper`] runs a closure, measures it on the monotonic clock and records the sample
//! in the timer tagged with the call site's class and method plus the outcome's exception kind
//! (`none` for `Ok`). Two wrappers are used per metered call: `<prefix>` around each attempt and
//! `<prefix>_retry` around the whole sequence, backoff sleeps included.
//!
//! Recording never affects the wrapped call: a registry error is logged at ERROR under the
//! `metered_retry::metrics` target and the closure's result is returned untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::CallSite;
use crate::error::{ErrorKind, NO_ERROR};
use crate::metrics::key::MetricKey;
use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone)]
pub struct TimingWrapper {
    registry: Arc<MetricsRegistry>,
    metric_name: String,
    percentiles: Vec<f64>,
}

impl TimingWrapper {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        metric_name: impl Into<String>,
        percentiles: &[f64],
        description: &str,
    ) -> Self {
        let metric_name = metric_name.into();
        if let Err(error) = registry.describe(metric_name.as_str(), description) {
            tracing::error!(
                target: "metered_retry::metrics",
                metric = %metric_name,
                %error,
                "failed to describe timer"
            );
        }
        Self { registry, metric_name, percentiles: percentiles.to_vec() }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Run `f`, record its duration and return its result.
    pub fn time<T, E, F>(&self, site: &CallSite, f: F) -> Result<T, E>
    where
        E: ErrorKind,
        F: FnOnce() -> Result<T, E>,
    {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => self.record(site, NO_ERROR, elapsed),
            Err(error) => self.record(site, &error.error_kind(), elapsed),
        }
        result
    }

    /// Record one sample directly.
    pub fn record(&self, site: &CallSite, exception_kind: &str, elapsed: Duration) {
        let key = MetricKey {
            metric_name: self.metric_name.clone(),
            exception_kind: exception_kind.to_owned(),
            class_name: site.class_name().to_owned(),
            method_name: site.method_name().to_owned(),
        };
        let recorded = self
            .registry
            .timer(key.meter_id(), &self.percentiles)
            .and_then(|timer| timer.record(elapsed));
        if let Err(error) = recorded {
            tracing::error!(
                target: "metered_retry::metrics",
                metric = %self.metric_name,
                call_site = %site,
                %error,
                "failed to record timer"
            );
        }
    }
}
