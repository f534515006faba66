//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::{AdmissionPolicy, DEFAULT_DAILY_LIMIT, DEFAULT_MAX_CONCURRENT};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::progress::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_TICK_INTERVAL};
use crate::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};

/// Allowed range for `max_concurrent`.
pub const MAX_CONCURRENT_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(32);
const RETRY_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "max_concurrent must be between {min} and {max}, got {value}\n  Suggestion: Use a value from {min} to {max}"
    )]
    MaxConcurrentOutOfRange {
        value: usize,
        min: usize,
        max: usize,
    },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("retry_max_delay ({max:?}) must not be shorter than retry_base_delay ({base:?})")]
    RetryDelayOrder { base: Duration, max: Duration },

    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,
}

/// Runtime settings for a [`crate::Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Downloads that may run at once (1-10).
    pub max_concurrent: usize,
    /// Downloads a free-tier user may start per UTC day.
    pub daily_limit: usize,
    /// Retry budget given to each new task.
    pub max_retries: u32,
    /// Time between progress ticks.
    pub tick_interval: Duration,
    /// Bound on one transfer attempt.
    pub attempt_timeout: Duration,
    /// Retry failed transfers automatically with backoff.
    pub auto_retry: bool,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Keep a create request as `Pending` instead of refusing it when every
    /// slot is taken.
    pub queue_when_busy: bool,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            daily_limit: DEFAULT_DAILY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            tick_interval: DEFAULT_TICK_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            auto_retry: true,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            queue_when_busy: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !MAX_CONCURRENT_RANGE.contains(&self.max_concurrent) {
            return Err(ConfigError::MaxConcurrentOutOfRange {
                value: self.max_concurrent,
                min: *MAX_CONCURRENT_RANGE.start(),
                max: *MAX_CONCURRENT_RANGE.end(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "tick_interval",
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "attempt_timeout",
            });
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::RetryDelayOrder {
                base: self.retry_base_delay,
                max: self.retry_max_delay,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    #[must_use]
    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            max_concurrent: self.max_concurrent,
            daily_limit: self.daily_limit,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay,
            self.retry_max_delay,
            RETRY_BACKOFF_MULTIPLIER,
        )
    }
}
