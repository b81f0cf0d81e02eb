//! Exponential backoff with mandatory random jitter.
//!
//! Attempt semantics: `attempt` is the number of failed attempts so far, so the delay before the
//! second call is `delay(1)`. The un-jittered base is `initial * multiplier^(attempt - 1)`; a
//! uniformly sampled [`Jitter`] factor is applied on top, and the result is capped at the
//! configured maximum.
//!
//! ```rust
//! use std::time::Duration;
//! use metered_retry::ExponentialRandomBackoff;
//!
//! let backoff = ExponentialRandomBackoff::new(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.base_delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.base_delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.base_delay(6), Duration::from_secs(2)); // capped
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to the cap, which itself can
//! never exceed `MAX_BACKOFF` (1 day).

use std::fmt;
use std::time::Duration;

use rand::{rng, Rng};
use thiserror::Error;

use crate::jitter::{self, Jitter};

/// Upper bound for any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    #[error("multiplier must be finite and >= 1.0 (got {0})")]
    InvalidMultiplier(f64),
    #[error("jitter range [{min}, {max}) is invalid; need 0 <= min < max")]
    InvalidJitterRange { min: f64, max: f64 },
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= initial interval ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Computes the delay before the next attempt.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn next_delay(&self, attempt: usize) -> Duration;
}

/// Randomized exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialRandomBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: Jitter,
}

impl ExponentialRandomBackoff {
    /// Backoff starting at `initial` and doubling each attempt.
    ///
    /// Capped at 30s, or at `initial` if that is larger.
    pub fn new(initial: Duration) -> Self {
        let initial = initial.min(MAX_BACKOFF);
        Self {
            initial,
            multiplier: DEFAULT_MULTIPLIER,
            max: DEFAULT_MAX_INTERVAL.max(initial),
            jitter: Jitter::default(),
        }
    }

    /// Set the exponential base. Must be finite and `>= 1.0`.
    pub fn with_multiplier(mut self, multiplier: f64) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        self.multiplier = multiplier;
        Ok(self)
    }

    /// Set the maximum delay. Returns an error if `max` is zero or below the initial interval.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.initial {
            return Err(BackoffError::MaxLessThanInitial { initial: self.initial, max });
        }
        self.max = max.min(MAX_BACKOFF);
        Ok(self)
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Delay before jitter for the given attempt (0 = initial call, no delay).
    pub fn base_delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let factor = self.multiplier.powi(exponent);
        jitter::scale(self.initial, factor).min(self.max)
    }

    /// Jittered delay using a caller-supplied RNG.
    pub fn next_delay_with_rng<R: Rng>(&self, attempt: usize, rng: &mut R) -> Duration {
        self.jitter.apply_with_rng(self.base_delay(attempt), rng).min(self.max)
    }
}

impl Default for ExponentialRandomBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL)
    }
}

impl BackoffStrategy for ExponentialRandomBackoff {
    fn next_delay(&self, attempt: usize) -> Duration {
        let mut rng = rng();
        self.next_delay_with_rng(attempt, &mut rng)
    }
}
