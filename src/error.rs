//! Error types for retry execution and metric recording.
//!
//! Three families exist:
//! - [`RetryError`]: what a caller sees once the retry loop gives up (or the recoverer fails).
//! - [`MonitoringError`]: failures while registering or updating a meter. These never reach the
//!   caller of a retried operation; the timing wrapper and metrics listener log and drop them.
//! - [`BuildError`]: invalid configuration rejected by the builders.
use std::borrow::Cow;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::backoff::BackoffError;

/// Exception tag value used when an attempt or sequence finished without an error.
pub const NO_ERROR: &str = "none";

/// Classifies an error into the short "exception kind" used as a metric tag.
///
/// The kind should be low-cardinality (a type or variant name, never a message). By default it is
/// the error's [`short_type_name`].
pub trait ErrorKind {
    fn error_kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(short_type_name::<Self>())
    }
}

impl ErrorKind for io::Error {
    fn error_kind(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{:?}", self.kind()))
    }
}

/// Last path segment of a type name, without generic arguments.
///
/// `short_type_name::<std::io::Error>()` is `"Error"`; `my_app::ApiError<u8>` becomes `"ApiError"`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// Error returned by the retry executor once it stops trying.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed and no recoverer was configured.
    #[error("retry exhausted after {attempts} attempts; last error: {source}")]
    Exhausted {
        /// Attempts made, including the first call.
        attempts: usize,
        /// Error returned by the final attempt.
        #[source]
        source: E,
    },
    /// Attempts were exhausted and the recoverer itself failed.
    #[error("recovery failed after {attempts} attempts: {source}")]
    Recovery {
        /// Attempts made before recovery was invoked.
        attempts: usize,
        /// Error returned by the recoverer.
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } | Self::Recovery { attempts, .. } => *attempts,
        }
    }

    /// Borrow the wrapped operation (or recoverer) error.
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::Recovery { source, .. } => source,
        }
    }

    /// Unwrap into the wrapped operation (or recoverer) error.
    pub fn into_last_error(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::Recovery { source, .. } => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_recovery(&self) -> bool {
        matches!(self, Self::Recovery { .. })
    }
}

impl<E: ErrorKind> ErrorKind for RetryError<E> {
    fn error_kind(&self) -> Cow<'_, str> {
        self.last_error().error_kind()
    }
}

/// Kind of meter stored in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MeterKind {
    Counter,
    Timer,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterKind::Counter => write!(f, "counter"),
            MeterKind::Timer => write!(f, "timer"),
        }
    }
}

/// Failure while registering or updating a meter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitoringError {
    #[error("metrics registry lock poisoned")]
    Poisoned,
    #[error("invalid meter name '{0}'")]
    InvalidName(String),
    #[error("invalid tag key '{key}' on meter '{name}'")]
    InvalidTagKey { name: String, key: String },
    #[error("meter '{name}' is already registered as a {existing}, not a {requested}")]
    KindConflict { name: String, existing: MeterKind, requested: MeterKind },
    #[error("meter '{name}' is registered with tag keys {existing:?}, got {requested:?}")]
    TagKeysConflict { name: String, existing: Vec<String>, requested: Vec<String> },
    #[error("histogram error: {0}")]
    Histogram(String),
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),
}

/// Errors produced while building an executor or metered retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error("metric prefix '{0}' is not a valid meter name")]
    InvalidMetricPrefix(String),
    #[error("exported percentile {0} must be within (0, 1]")]
    InvalidPercentile(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("upstream said {0}")]
    struct Upstream(&'static str);

    impl ErrorKind for Upstream {}

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<io::Error>(), "Error");
        assert_eq!(short_type_name::<Upstream>(), "Upstream");
        assert_eq!(short_type_name::<Vec<Upstream>>(), "Vec");
        assert_eq!(short_type_name::<u32>(), "u32");
    }

    #[test]
    fn error_kind_defaults_to_short_type_name() {
        assert_eq!(Upstream("503").error_kind(), "Upstream");
    }

    #[test]
    fn io_error_kind_uses_error_kind_variant() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(err.error_kind(), "ConnectionReset");
    }

    #[test]
    fn exhausted_display_includes_last_error() {
        let err = RetryError::Exhausted { attempts: 3, source: Upstream("503") };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("upstream said 503"));
        assert!(err.is_exhausted());
        assert!(!err.is_recovery());
    }

    #[test]
    fn source_points_at_wrapped_error() {
        let err = RetryError::Recovery { attempts: 2, source: Upstream("fallback down") };
        let source = err.source().expect("source present");
        assert_eq!(source.to_string(), "upstream said fallback down");
        assert_eq!(err.attempts(), 2);
    }

    #[test]
    fn retry_error_kind_delegates_to_last_error() {
        let err = RetryError::Exhausted { attempts: 1, source: Upstream("x") };
        assert_eq!(err.error_kind(), "Upstream");
        assert_eq!(err.into_last_error(), Upstream("x"));
    }

    #[test]
    fn monitoring_error_display() {
        let err = MonitoringError::KindConflict {
            name: "api".into(),
            existing: MeterKind::Counter,
            requested: MeterKind::Timer,
        };
        assert_eq!(err.to_string(), "meter 'api' is already registered as a counter, not a timer");
    }
}
