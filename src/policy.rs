//! Attempt-count retry policy.
//!
//! Any failure counts toward the bound; there is no per-error classification.

use crate::error::BuildError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Permits another attempt while fewer than `max_attempts` attempts have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    /// `max_attempts` counts total attempts (initial call + retries) and must be > 0.
    pub fn new(max_attempts: usize) -> Result<Self, BuildError> {
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(max_attempts));
        }
        Ok(Self { max_attempts })
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether another attempt may follow `attempt_count` failed attempts.
    pub fn should_retry(&self, attempt_count: usize) -> bool {
        attempt_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_until_bound() {
        let policy = RetryPolicy::new(3).unwrap();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn single_attempt_never_retries() {
        let policy = RetryPolicy::new(1).unwrap();
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert_eq!(RetryPolicy::new(0), Err(BuildError::InvalidMaxAttempts(0)));
    }
}
