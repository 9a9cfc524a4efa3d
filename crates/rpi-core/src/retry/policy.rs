//! Backoff policy for remote reads.

use std::time::Duration;

/// How a failed remote read should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// No answer in time.
    TimedOut,
    /// The server is shedding load (429, 503).
    Overloaded,
    /// The connection dropped or never came up, or the body ended early.
    Dropped,
    /// Any other 5xx.
    ServerError(u16),
    /// Bad input, a 4xx, a closed sink or a disconnected source.
    Permanent,
}

impl Failure {
    pub fn is_transient(self) -> bool {
        !matches!(self, Failure::Permanent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff with a cap. Built from `RpiConfig::retry`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per operation, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// One attempt, never retried.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the 1-based `attempt` failed: the base doubled per
    /// attempt, one extra doubling for an overloaded server, capped.
    pub fn backoff(&self, attempt: u32, failure: Failure) -> Duration {
        let mut shift = attempt.saturating_sub(1).min(10);
        if failure == Failure::Overloaded {
            shift += 1;
        }
        self.base_delay.saturating_mul(1 << shift).min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, failure: Failure) -> RetryDecision {
        if attempt >= self.max_attempts || !failure.is_transient() {
            RetryDecision::NoRetry
        } else {
            RetryDecision::RetryAfter(self.backoff(attempt, failure))
        }
    }
}
