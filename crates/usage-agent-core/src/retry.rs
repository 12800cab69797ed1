//! # Retry Policy Module
//!
//! Exponential backoff for a [`RetryingSender`](crate::sender::RetryingSender)'s
//! transient send failures, with jitter to prevent thundering herd after a
//! process restart.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// `nextAttempt = now + min(max, base * multiplier^failureCount) * (1 ± jitter)`
///
/// # Examples
///
/// ```rust
/// use usage_agent_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
/// let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(60), 2.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of transient failures tolerated before an entry goes Dead.
    pub max_attempts: u32,

    /// Initial delay before the first retry.
    pub base_delay: Duration,

    /// Delay cap; backoff never grows past this.
    pub max_delay: Duration,

    /// Exponential growth factor (typically 1.5-2.0).
    pub multiplier: f64,

    /// Maximum time an entry may remain in the queue before it is
    /// abandoned regardless of `max_attempts`.
    pub max_lifetime: Duration,

    /// Jitter fraction applied to the computed delay (default ±25%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_lifetime: Duration::from_secs(24 * 60 * 60),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            multiplier,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `failure_count` transient
    /// failures.
    pub fn should_retry(&self, failure_count: u32) -> bool {
        failure_count < self.max_attempts
    }

    /// Compute the delay before the attempt following `failure_count`
    /// transient failures (0-based: the delay before the *first* retry
    /// uses `failure_count == 0`).
    pub fn calculate_delay(&self, failure_count: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(failure_count as i32);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());
        let jittered_secs = Self::add_jitter(capped_secs, self.jitter);
        Duration::from_secs_f64(jittered_secs)
    }

    /// Apply ±`jitter_fraction` random jitter to `delay_secs`, never going
    /// negative.
    fn add_jitter(delay_secs: f64, jitter_fraction: f64) -> f64 {
        if jitter_fraction <= 0.0 {
            return delay_secs;
        }
        let range = delay_secs * jitter_fraction;
        let jitter = rand::thread_rng().gen_range(-range..=range);
        (delay_secs + jitter).max(0.0)
    }
}

/// Per-entry retry bookkeeping, independent of the policy so the same
/// entry can be re-evaluated if the policy changes across a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    /// Number of transient failures observed so far.
    pub failure_count: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.failure_count)
    }

    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.calculate_delay(self.failure_count)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
