//! Prometheus exporter for `metered-retry`.
//! Bring your own `prometheus::Registry`; meter families are registered on first export.
//!
//! - Counters become `IntCounterVec`s with the meter's tags as labels. Each [`sync`] adds only
//!   the increments since the previous one.
//! - Timers become gauges in seconds: `<name>_seconds{quantile=..}` for every published
//!   percentile, plus `<name>_seconds_count`, `<name>_seconds_sum` and `<name>_seconds_max`.
//!
//! [`sync`]: PrometheusExporter::sync

use std::collections::HashMap;
use std::string::FromUtf8Error;
use std::sync::{Arc, Mutex};

use metered_retry::metrics::{MeterId, MeterSnapshot, MetricsRegistry, TimerSnapshot};
use metered_retry::MonitoringError;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

const QUANTILE_LABEL: &str = "quantile";
const FALLBACK_HELP: &str = "metered-retry meter";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
    #[error("exposition output is not UTF-8: {0}")]
    Encoding(#[from] FromUtf8Error),
    #[error("exporter state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct ExportState {
    counters: HashMap<String, IntCounterVec>,
    gauges: HashMap<String, GaugeVec>,
    exported: HashMap<MeterId, u64>,
}

#[derive(Debug)]
pub struct PrometheusExporter {
    source: Arc<MetricsRegistry>,
    registry: Arc<Registry>,
    state: Mutex<ExportState>,
}

impl PrometheusExporter {
    pub fn new<R: Into<Arc<Registry>>>(source: Arc<MetricsRegistry>, registry: R) -> Self {
        Self { source, registry: registry.into(), state: Mutex::new(ExportState::default()) }
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Copy the current state of every meter into the Prometheus registry.
    ///
    /// # Errors
    /// Returns an error if a family cannot be registered (e.g. name conflict with a collector
    /// registered elsewhere) or the source registry is poisoned.
    pub fn sync(&self) -> Result<(), ExportError> {
        let snapshot = self.source.snapshot()?;
        let mut state = self.state.lock().map_err(|_| ExportError::Poisoned)?;
        for meter in snapshot {
            match meter {
                MeterSnapshot::Counter { id, count } => self.export_counter(&mut state, id, count)?,
                MeterSnapshot::Timer { id, timer } => self.export_timer(&mut state, &id, &timer)?,
            }
        }
        Ok(())
    }

    /// Sync, then render the registry in the text exposition format.
    pub fn render(&self) -> Result<String, ExportError> {
        self.sync()?;
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn export_counter(
        &self,
        state: &mut ExportState,
        id: MeterId,
        count: u64,
    ) -> Result<(), ExportError> {
        let labels: Vec<&str> = id.tags().keys().map(String::as_str).collect();
        let vec = match state.counters.get(id.name()) {
            Some(vec) => vec.clone(),
            None => {
                let vec = IntCounterVec::new(self.opts(id.name(), id.name()), &labels)?;
                self.registry.register(Box::new(vec.clone()))?;
                state.counters.insert(id.name().to_string(), vec.clone());
                vec
            }
        };
        let values: Vec<&str> = id.tags().values().map(String::as_str).collect();
        let previous = state.exported.get(&id).copied().unwrap_or(0);
        let delta = count.saturating_sub(previous);
        if delta > 0 {
            vec.with_label_values(values.as_slice()).inc_by(delta);
        }
        state.exported.insert(id, count);
        Ok(())
    }

    fn export_timer(
        &self,
        state: &mut ExportState,
        id: &MeterId,
        timer: &TimerSnapshot,
    ) -> Result<(), ExportError> {
        let base = format!("{}_seconds", id.name());
        let values: Vec<&str> = id.tags().values().map(String::as_str).collect();

        for percentile in &timer.percentiles {
            let quantile = percentile.quantile.to_string();
            let mut with_quantile = values.clone();
            with_quantile.push(quantile.as_str());
            self.gauge(state, &base, id, id.name(), true)?
                .with_label_values(with_quantile.as_slice())
                .set(percentile.value.as_secs_f64());
        }

        let aggregates = [
            ("count", timer.count as f64),
            ("sum", timer.total.as_secs_f64()),
            ("max", timer.max.as_secs_f64()),
        ];
        for (suffix, value) in aggregates {
            let name = format!("{base}_{suffix}");
            self.gauge(state, &name, id, id.name(), false)?
                .with_label_values(values.as_slice())
                .set(value);
        }
        Ok(())
    }

    fn gauge(
        &self,
        state: &mut ExportState,
        name: &str,
        id: &MeterId,
        family: &str,
        quantile: bool,
    ) -> Result<GaugeVec, ExportError> {
        if let Some(vec) = state.gauges.get(name) {
            return Ok(vec.clone());
        }
        let mut labels: Vec<&str> = id.tags().keys().map(String::as_str).collect();
        if quantile {
            labels.push(QUANTILE_LABEL);
        }
        let vec = GaugeVec::new(self.opts(name, family), &labels)?;
        self.registry.register(Box::new(vec.clone()))?;
        tracing::debug!(family = name, "registered prometheus gauge family");
        state.gauges.insert(name.to_string(), vec.clone());
        Ok(vec)
    }

    fn opts(&self, name: &str, family: &str) -> Opts {
        let help = self
            .source
            .description(family)
            .filter(|help| !help.is_empty())
            .unwrap_or_else(|| FALLBACK_HELP.to_string());
        Opts::new(name, help)
    }
}
