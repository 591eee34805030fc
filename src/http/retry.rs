//! Retry policy with exponential backoff

use std::time::Duration;

use crate::config::ConfigError;

/// How many times to try a request and how long to wait between tries
///
/// The wait before attempt `n + 1` is `base_delay * backoff_multiplier^(n - 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Validates and builds a policy
    ///
    /// `max_attempts` must be at least 1 and `backoff_multiplier` at least 1.0.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff_multiplier",
                reason: format!("must be a finite number >= 1, got {}", backoff_multiplier),
            });
        }
        Ok(Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
        })
    }

    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}
