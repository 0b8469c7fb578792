//! Executor tuning: concurrency window, retry policy and confirmation polling.

use std::time::Duration;

use crate::ExecutorError;

/// Bounded exponential backoff for transient adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient failures tolerated before a future fails with
    /// `TransientFailureExhausted`.
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `failure_count` (1-based), doubling up to `backoff_max`.
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        let mut delay = self.backoff_initial;
        for _ in 1..failure_count {
            delay = delay.saturating_mul(2);
            if delay >= self.backoff_max {
                return self.backoff_max;
            }
        }
        std::cmp::min(delay, self.backoff_max)
    }

    /// True once `failure_count` transient failures exhaust the policy.
    pub fn is_exhausted(&self, failure_count: u32) -> bool {
        failure_count >= self.max_attempts
    }
}

/// Runtime configuration for an [`crate::Executor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum futures executing at once.
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
    /// Delay between receipt polls while a transaction is pending.
    pub poll_interval: Duration,
    /// Give up waiting for a receipt after this long; the handle stays journaled.
    pub confirmation_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(300),
        }
    }
}

impl ExecutorConfig {
    /// Validates concurrency, polling and retry-backoff settings.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be greater than 0"));
        }
        if self.retry.backoff_initial.is_zero() {
            return Err(invalid("retry.backoff_initial must be greater than 0"));
        }
        if self.retry.backoff_max < self.retry.backoff_initial {
            return Err(invalid("retry.backoff_max must be >= retry.backoff_initial"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than 0"));
        }
        if self.confirmation_timeout < self.poll_interval {
            return Err(invalid("confirmation_timeout must be >= poll_interval"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ExecutorError {
    ExecutorError::InvalidConfig(message.to_string())
}
