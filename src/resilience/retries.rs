//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed upstream attempt may be repeated
//! - Bound the number of attempts per request
//! - Space attempts with jittered exponential backoff
//!
//! # Design Decisions
//! - Only connection-level failures are retried: connect errors, transport
//!   errors before a response head, and timeouts
//! - A request the client refuses to send (bad URL, redirect loop) fails
//!   identically every time and is never retried
//! - An HTTP response of any status is final and forwarded as-is
//! - Disabled policies still make exactly one attempt

use std::time::Duration;

use crate::config::schema::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Why an upstream attempt produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    TimedOut,
    Connection(String),
    /// The request could not be built or followed; repeating it cannot help.
    Rejected(String),
}

impl AttemptFailure {
    /// Classify an error returned by `reqwest` before any response head arrived.
    pub fn from_send_error(error: &reqwest::Error) -> Self {
        if error.is_builder() || error.is_redirect() {
            AttemptFailure::Rejected(error.to_string())
        } else if error.is_timeout() && !error.is_connect() {
            AttemptFailure::TimedOut
        } else {
            AttemptFailure::Connection(error.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptFailure::Rejected(_))
    }
}

/// Attempt budget and spacing for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled { config.max_attempts.max(1) } else { 1 },
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, failure: &AttemptFailure) -> bool {
        attempt < self.max_attempts && failure.is_retryable()
    }

    /// Delay before attempt number `next_attempt` (2-based: the first retry).
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        calculate_backoff(next_attempt.saturating_sub(1), self.base_delay_ms, self.max_delay_ms)
    }
}
