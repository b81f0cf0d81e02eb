//! Instance-scoped, thread-safe store of counters and timers.
//!
//! Meters are created lazily on first use and never removed. Lookups take a read lock; a miss
//! takes the write lock and checks again before inserting, so concurrent callers racing on the
//! same id all receive the same `Arc` handle. Increments happen on the handle after the lock is
//! released.
//!
//! Every meter name belongs to one family with a fixed kind and tag-key set. Registering the same
//! name as a different kind, or with different tag keys, is rejected the way an exposition format
//! like Prometheus would reject it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::meter::{Counter, MeterId, Timer, TimerSnapshot};
use crate::error::{MeterKind, MonitoringError};

/// A registered meter handle.
#[derive(Debug, Clone)]
pub enum Meter {
    Counter(Arc<Counter>),
    Timer(Arc<Timer>),
}

impl Meter {
    pub fn id(&self) -> &MeterId {
        match self {
            Meter::Counter(c) => c.id(),
            Meter::Timer(t) => t.id(),
        }
    }

    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Timer(_) => MeterKind::Timer,
        }
    }
}

/// Point-in-time view of one meter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum MeterSnapshot {
    Counter { id: MeterId, count: u64 },
    Timer { id: MeterId, timer: TimerSnapshot },
}

impl MeterSnapshot {
    pub fn id(&self) -> &MeterId {
        match self {
            MeterSnapshot::Counter { id, .. } | MeterSnapshot::Timer { id, .. } => id,
        }
    }
}

/// Errors from the `exactly_one_*` lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no meter '{name}' matches the given tags")]
    NotFound { name: String },
    #[error("{matches} meters named '{name}' match the given tags")]
    Ambiguous { name: String, matches: usize },
}

#[derive(Debug)]
struct Family {
    kind: MeterKind,
    tag_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    meters: HashMap<MeterId, Meter>,
    families: HashMap<String, Family>,
    descriptions: HashMap<String, String>,
}

/// Registry of live meters. Share it with `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: RwLock<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter with this id.
    pub fn counter(&self, id: MeterId) -> Result<Arc<Counter>, MonitoringError> {
        let meter = self.get_or_create(id, MeterKind::Counter, |id| {
            Ok(Meter::Counter(Arc::new(Counter::new(id))))
        })?;
        match meter {
            Meter::Counter(counter) => Ok(counter),
            other => Err(kind_conflict(other.id(), other.kind(), MeterKind::Counter)),
        }
    }

    /// Get or create the timer with this id. `percentiles` only applies on creation.
    pub fn timer(&self, id: MeterId, percentiles: &[f64]) -> Result<Arc<Timer>, MonitoringError> {
        let meter = self.get_or_create(id, MeterKind::Timer, |id| {
            Ok(Meter::Timer(Arc::new(Timer::new(id, percentiles)?)))
        })?;
        match meter {
            Meter::Timer(timer) => Ok(timer),
            other => Err(kind_conflict(other.id(), other.kind(), MeterKind::Timer)),
        }
    }

    /// Attach help text to a meter family. Later descriptions replace earlier ones.
    pub fn describe(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(), MonitoringError> {
        let mut inner = self.inner.write().map_err(|_| MonitoringError::Poisoned)?;
        inner.descriptions.insert(name.into(), description.into());
        Ok(())
    }

    pub fn description(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().ok()?;
        inner.descriptions.get(name).cloned()
    }

    /// All meters sorted by id.
    pub fn meters(&self) -> Result<Vec<Meter>, MonitoringError> {
        let inner = self.inner.read().map_err(|_| MonitoringError::Poisoned)?;
        let mut meters: Vec<Meter> = inner.meters.values().cloned().collect();
        meters.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(meters)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.meters.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters named `name` carrying every tag in `tags`.
    pub fn find_counters(&self, name: &str, tags: &[(&str, &str)]) -> Vec<Arc<Counter>> {
        self.meters()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|meter| match meter {
                Meter::Counter(c) if c.id().matches(name, tags) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Timers named `name` carrying every tag in `tags`.
    pub fn find_timers(&self, name: &str, tags: &[(&str, &str)]) -> Vec<Arc<Timer>> {
        self.meters()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|meter| match meter {
                Meter::Timer(t) if t.id().matches(name, tags) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn exactly_one_counter(
        &self,
        name: &str,
        tags: &[(&str, &str)],
    ) -> Result<Arc<Counter>, LookupError> {
        exactly_one(name, self.find_counters(name, tags))
    }

    pub fn exactly_one_timer(
        &self,
        name: &str,
        tags: &[(&str, &str)],
    ) -> Result<Arc<Timer>, LookupError> {
        exactly_one(name, self.find_timers(name, tags))
    }

    pub fn snapshot(&self) -> Result<Vec<MeterSnapshot>, MonitoringError> {
        Ok(self
            .meters()?
            .into_iter()
            .map(|meter| match meter {
                Meter::Counter(c) => {
                    MeterSnapshot::Counter { id: c.id().clone(), count: c.count() }
                }
                Meter::Timer(t) => MeterSnapshot::Timer { id: t.id().clone(), timer: t.snapshot() },
            })
            .collect())
    }

    /// Snapshot rendered as a JSON array.
    #[cfg(feature = "telemetry-json")]
    pub fn snapshot_json(&self) -> Result<serde_json::Value, MonitoringError> {
        serde_json::to_value(self.snapshot()?)
            .map_err(|e| MonitoringError::Serialization(e.to_string()))
    }

    fn get_or_create<F>(
        &self,
        id: MeterId,
        kind: MeterKind,
        make: F,
    ) -> Result<Meter, MonitoringError>
    where
        F: FnOnce(MeterId) -> Result<Meter, MonitoringError>,
    {
        {
            let inner = self.inner.read().map_err(|_| MonitoringError::Poisoned)?;
            if let Some(meter) = inner.meters.get(&id) {
                return Ok(meter.clone());
            }
        }

        validate(&id)?;
        let mut inner = self.inner.write().map_err(|_| MonitoringError::Poisoned)?;
        let inner = &mut *inner;
        if let Some(meter) = inner.meters.get(&id) {
            return Ok(meter.clone());
        }

        let tag_keys = id.tag_keys();
        match inner.families.get(id.name()) {
            Some(family) if family.kind != kind => {
                return Err(kind_conflict(&id, family.kind, kind));
            }
            Some(family) if family.tag_keys != tag_keys => {
                return Err(MonitoringError::TagKeysConflict {
                    name: id.name().to_string(),
                    existing: family.tag_keys.clone(),
                    requested: tag_keys,
                });
            }
            Some(_) => {}
            None => {
                let meter = make(id.clone())?;
                inner.families.insert(id.name().to_string(), Family { kind, tag_keys });
                inner.meters.insert(id, meter.clone());
                return Ok(meter);
            }
        }

        let meter = make(id.clone())?;
        inner.meters.insert(id, meter.clone());
        Ok(meter)
    }
}

fn kind_conflict(id: &MeterId, existing: MeterKind, requested: MeterKind) -> MonitoringError {
    MonitoringError::KindConflict { name: id.name().to_string(), existing, requested }
}

fn exactly_one<T>(name: &str, mut found: Vec<T>) -> Result<T, LookupError> {
    match found.len() {
        0 => Err(LookupError::NotFound { name: name.to_string() }),
        1 => Ok(found.remove(0)),
        matches => Err(LookupError::Ambiguous { name: name.to_string(), matches }),
    }
}

/// Meter names: `[a-zA-Z_:][a-zA-Z0-9_:]*`. Tag keys: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_tag_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate(id: &MeterId) -> Result<(), MonitoringError> {
    if !is_valid_name(id.name()) {
        return Err(MonitoringError::InvalidName(id.name().to_string()));
    }
    if let Some(key) = id.tags().keys().find(|k| !is_valid_tag_key(k)) {
        return Err(MonitoringError::InvalidTagKey {
            name: id.name().to_string(),
            key: key.clone(),
        });
    }
    Ok(())
}
