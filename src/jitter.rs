//! Multiplicative jitter for backoff delays.
//!
//! Every computed backoff is scaled by a factor drawn uniformly from `[min, max)`. Without it,
//! callers that started failing together against the same dependency would also retry together.
//!
//! - `Jitter::default()`: factor in `[1.0, 2.0)`, never shortens the exponential base delay.
//! - `Jitter::equal()`: factor in `[0.5, 1.5)`, centred on the base delay.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`.
//!
//! ```rust
//! use metered_retry::Jitter;
//! use std::time::Duration;
//!
//! let jitter = Jitter::new(1.0, 1.5).unwrap();
//! let delay = jitter.apply(Duration::from_millis(100));
//! assert!(delay >= Duration::from_millis(100));
//! assert!(delay < Duration::from_millis(150));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

use crate::backoff::{BackoffError, MAX_BACKOFF};

pub const DEFAULT_JITTER_MIN: f64 = 1.0;
pub const DEFAULT_JITTER_MAX: f64 = 2.0;

/// Uniform multiplicative jitter range.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Jitter {
    min: f64,
    max: f64,
}

impl Jitter {
    /// Create a jitter range. Requires `0 <= min < max` and both finite.
    pub fn new(min: f64, max: f64) -> Result<Self, BackoffError> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min >= max {
            return Err(BackoffError::InvalidJitterRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Factor in `[0.5, 1.5)`.
    pub fn equal() -> Self {
        Self { min: 0.5, max: 1.5 }
    }

    /// Smallest factor that can be applied.
    pub fn min_factor(&self) -> f64 {
        self.min
    }

    /// Exclusive upper bound of the factor.
    pub fn max_factor(&self) -> f64 {
        self.max
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        if delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = rng.random_range(self.min..self.max);
        scale(delay, factor)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self { min: DEFAULT_JITTER_MIN, max: DEFAULT_JITTER_MAX }
    }
}

/// Multiply a duration by a non-negative factor, saturating at `MAX_BACKOFF`.
pub(crate) fn scale(delay: Duration, factor: f64) -> Duration {
    let secs = delay.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
        return MAX_BACKOFF;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(MAX_BACKOFF)
}
