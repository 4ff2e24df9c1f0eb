//! Backoff policy for link retries.
//!
//! Initial connection failures and unexpected drops share one policy: up to
//! `max_attempts` further attempts, each preceded by an exponentially growing
//! delay.

use std::time::Duration;

use rand::Rng;

use crate::error::LinkError;

/// Default number of retries after a failed attempt.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);

/// Upper bound on the delay between retries.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(60_000);

/// Options for automatic reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectOptions {
    /// Retries allowed after the first failed attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_ATTEMPTS,
            initial_delay: INITIAL_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Set the number of retries.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay before the first retry.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let max_ms = self.max_delay.as_millis() as f64;

        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }

        let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
        base.mul_f64(jitter_factor)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(LinkError::invalid_config(
                "backoff_multiplier must be >= 1.0",
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(LinkError::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(LinkError::invalid_config(
                "max_delay must be >= initial_delay",
            ));
        }
        Ok(())
    }
}
