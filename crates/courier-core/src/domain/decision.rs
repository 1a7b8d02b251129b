//! Retry decisions: what happens to an entry after a failed attempt.
//!
//! The decider is a pure function of the entry's retry accounting and the
//! failure kind. Applying the decision is the queue store's job.

use std::time::Duration;

use super::entry::QueueEntry;
use super::outcome::FailureKind;

/// Backoff before a fresh retry attempt becomes claimable.
///
/// delay = base_delay * multiplier^(retry_count - 1), capped at max_delay.
/// A zero base delay makes retries claimable immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay: Duration::from_secs(3600),
        }
    }

    /// `retry_count` is the number of failures so far (1 after the first).
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = retry_count.saturating_sub(1).min(30) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Next step for a failed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Record the failure and queue a fresh attempt after `delay`.
    Retry { retry_count: u32, delay: Duration },

    /// Budget exhausted: park the entry for an operator.
    Quarantine { retry_count: u32, reason: String },

    /// Record the failure without a successor; retrying cannot succeed.
    Abandon { retry_count: u32, reason: String },
}

impl Decision {
    pub fn retry_count(&self) -> u32 {
        match self {
            Decision::Retry { retry_count, .. }
            | Decision::Quarantine { retry_count, .. }
            | Decision::Abandon { retry_count, .. } => *retry_count,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryDecider {
    policy: RetryPolicy,
}

impl RetryDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn decide(&self, entry: &QueueEntry, kind: FailureKind, error: &str) -> Decision {
        let retry_count = entry.retry_count.saturating_add(1);
        if kind == FailureKind::Configuration {
            return Decision::Abandon {
                retry_count,
                reason: format!("configuration error, not retried: {error}"),
            };
        }
        if retry_count >= entry.max_retries {
            return Decision::Quarantine {
                retry_count,
                reason: format!(
                    "retries exhausted ({retry_count}/{}): {error}",
                    entry.max_retries
                ),
            };
        }
        Decision::Retry {
            retry_count,
            delay: self.policy.next_delay(retry_count),
        }
    }
}
