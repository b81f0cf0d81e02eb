//! Metric storage for retried calls.
//!
//! A [`MetricsRegistry`] holds two kinds of meters, both identified by name plus tags:
//!
//! - [`Counter`]: `<prefix>_retries` and `<prefix>_failures`, driven by the metrics listener.
//! - [`Timer`]: `<prefix>` (one attempt) and `<prefix>_retry` (the whole sequence), driven by the
//!   timing wrapper.
//!
//! The registry is an ordinary value: whoever builds the executor owns it and shares it with
//! `Arc`. Nothing here is global.

pub mod key;
pub mod meter;
pub mod registry;

pub use key::{CounterKey, MetricKey};
pub use meter::{Counter, MeterId, PercentileValue, Timer, TimerSnapshot};
pub use registry::{LookupError, Meter, MeterSnapshot, MetricsRegistry};

pub use crate::error::{MeterKind, MonitoringError};
