//! Meter identities and the live counter/timer handles stored in a registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::error::MonitoringError;

/// Significant figures kept by timer histograms.
const HISTOGRAM_SIGFIG: u8 = 3;

/// Name plus sorted tags; two meters are the same meter iff their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeterId {
    name: String,
    tags: BTreeMap<String, String>,
}

impl MeterId {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), tags: BTreeMap::new() }
    }

    /// Add (or replace) a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Tag keys in sorted order.
    pub fn tag_keys(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// True if the name matches and every given tag is present with the given value.
    pub fn matches(&self, name: &str, tags: &[(&str, &str)]) -> bool {
        self.name == name && tags.iter().all(|(k, v)| self.tag(k) == Some(*v))
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            let rendered: Vec<String> =
                self.tags.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
            write!(f, "{{{}}}", rendered.join(","))?;
        }
        Ok(())
    }
}

/// Monotonic event counter.
#[derive(Debug)]
pub struct Counter {
    id: MeterId,
    value: AtomicU64,
}

impl Counter {
    pub(crate) fn new(id: MeterId) -> Self {
        Self { id, value: AtomicU64::new(0) }
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Duration recorder with count/total/max and an HDR histogram for percentiles.
///
/// Count, total and max are atomics; the histogram sits behind a mutex held only for a single
/// record or quantile lookup.
#[derive(Debug)]
pub struct Timer {
    id: MeterId,
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    histogram: Mutex<Histogram<u64>>,
    percentiles: Vec<f64>,
}

impl Timer {
    pub(crate) fn new(id: MeterId, percentiles: &[f64]) -> Result<Self, MonitoringError> {
        let histogram = Histogram::<u64>::new(HISTOGRAM_SIGFIG)
            .map_err(|e| MonitoringError::Histogram(e.to_string()))?;
        Ok(Self {
            id,
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            histogram: Mutex::new(histogram),
            percentiles: percentiles.to_vec(),
        })
    }

    pub fn id(&self) -> &MeterId {
        &self.id
    }

    /// Record one sample.
    ///
    /// Count, total and max are always updated, even when the histogram rejects the sample or its
    /// lock was poisoned.
    pub fn record(&self, elapsed: Duration) -> Result<(), MonitoringError> {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        let mut histogram = self.histogram.lock().map_err(|_| MonitoringError::Poisoned)?;
        histogram.record(nanos).map_err(|e| MonitoringError::Histogram(format!("{e:?}")))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = self.count();
        (count > 0).then(|| self.total() / u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Value at quantile `q` (0.0..=1.0), or `None` if nothing has been recorded.
    pub fn percentile(&self, q: f64) -> Option<Duration> {
        let histogram = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);
        if histogram.len() == 0 {
            return None;
        }
        Some(Duration::from_nanos(histogram.value_at_quantile(q.clamp(0.0, 1.0))))
    }

    /// Quantiles this timer was configured to publish.
    pub fn published_percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let percentiles = self
            .percentiles
            .iter()
            .filter_map(|&quantile| {
                self.percentile(quantile).map(|value| PercentileValue { quantile, value })
            })
            .collect();
        TimerSnapshot { count: self.count(), total: self.total(), max: self.max(), percentiles }
    }
}

/// One published quantile.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PercentileValue {
    pub quantile: f64,
    pub value: Duration,
}

/// Point-in-time view of a timer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TimerSnapshot {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    pub percentiles: Vec<PercentileValue>,
}
