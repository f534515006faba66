//! Automatic retry policy with exponential backoff.
//!
//! A failed transfer is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether the scheduler should retry on its own
//! and how long to wait first.
//!
//! # Example
//!
//! ```
//! use download_scheduler::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retry #{attempt} in {delay:?}");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default retry budget per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each retry).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Upper bound on jitter added to a delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed if tried again (network drop, timeout).
    Transient,
    /// Will not succeed however often it is retried.
    Permanent,
}

/// Whether, and when, to retry a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which retry this will be (1 for the first retry).
        attempt: u32,
    },
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Backoff configuration for automatic retries.
///
/// ```text
/// delay = min(base_delay * multiplier^retries_used, max_delay) + jitter
/// ```
///
/// Jitter is at most 500ms and never more than a quarter of the capped delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether a task that has already used `retries_used` retries
    /// should be retried after a failure of the given type.
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, retries_used: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }
        if retries_used >= self.max_retries {
            debug!(retries_used, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("retry budget ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.delay_for(retries_used);
        debug!(
            next_attempt = retries_used + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: retries_used + 1,
        }
    }

    /// Backoff delay before the retry following `retries_used` earlier ones.
    #[must_use]
    pub fn delay_for(&self, retries_used: u32) -> Duration {
        let capped = self.base_delay_for(retries_used);
        capped + jitter(capped)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn base_delay_for(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = i32::try_from(retries_used).unwrap_or(i32::MAX);
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

fn jitter(capped: Duration) -> Duration {
    let bound = MAX_JITTER.min(capped / 4);
    let bound_ms = u64::try_from(bound.as_millis()).unwrap_or(0);
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::thread_rng().gen_range(0..=bound_ms);
    Duration::from_millis(jitter_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(4), 2.0);
        assert_eq!(policy.base_delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for(5), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_short_delays_get_proportional_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(20), Duration::from_secs(1), 2.0);
        let delay = policy.delay_for(0);
        assert!(delay >= Duration::from_millis(20));
        assert!(delay <= Duration::from_millis(25));
    }

    #[test]
    fn test_should_retry_transient_within_budget() {
        let policy = RetryPolicy::default();
        match policy.should_retry(FailureType::Transient, 1) {
            RetryDecision::Retry { attempt, delay } => {
                assert_eq!(attempt, 2);
                assert!(delay >= Duration::from_secs(2));
            }
            RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
        }
    }

    #[test]
    fn test_should_not_retry_when_budget_exhausted() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Transient, 3);
        assert!(
            matches!(decision, RetryDecision::DoNotRetry { ref reason } if reason.contains("exhausted"))
        );
    }

    #[test]
    fn test_should_not_retry_permanent() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 0);
        assert!(
            matches!(decision, RetryDecision::DoNotRetry { ref reason } if reason.contains("permanent"))
        );
    }

    #[test]
    fn test_new_clamps_multiplier_and_cap() {
        let policy = RetryPolicy::new(1, Duration::from_secs(2), Duration::from_secs(1), 0.5);
        assert_eq!(policy.max_delay, Duration::from_secs(2));
        assert!((policy.backoff_multiplier - 1.0).abs() < f32::EPSILON);
    }
}
