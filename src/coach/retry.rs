//! Retry policy for provider calls, as an explicit state machine.
//!
//! ```text
//! Attempting --ok--------------------------------> (parse) Done | Malformed
//! Attempting --transient, retries left--> Backoff --sleep--> Attempting
//! Attempting --transient, none left-----> Exhausted
//! ```
//!
//! Success and malformed output leave the machine directly from
//! `Attempting`; this module only decides what follows a transient failure.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::consts::{DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_MAX_RETRIES};

/// Why an attempt failed in a way worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The per-attempt deadline expired or the provider reported a timeout.
    Timeout,
    /// Connection failure, overload, 5xx.
    Transient,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout => f.write_str("timed out"),
            FailureCause::Transient => f.write_str("transient failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Deadline for each individual attempt.
    pub attempt_timeout: Duration,
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (0-indexed): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry))
    }

    /// Total attempts the policy allows, first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Next state after attempt `attempt` (0-indexed) failed transiently.
    pub fn after_failure(&self, attempt: u32, cause: FailureCause) -> RetryState {
        if attempt.saturating_add(1) < self.max_attempts() {
            RetryState::Backoff {
                attempt,
                delay: self.delay_for(attempt),
                cause,
            }
        } else {
            RetryState::Exhausted {
                attempts: attempt + 1,
                cause,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting {
        attempt: u32,
    },
    /// Waiting out `delay` after attempt `attempt` failed with `cause`.
    Backoff {
        attempt: u32,
        delay: Duration,
        cause: FailureCause,
    },
    /// No attempts left. `cause` is the last failure seen.
    Exhausted {
        attempts: u32,
        cause: FailureCause,
    },
}

impl RetryState {
    pub fn start() -> Self {
        RetryState::Attempting { attempt: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_one_then_two_seconds() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn failures_back_off_until_exhausted() {
        let config = RetryConfig::default();
        assert_eq!(
            config.after_failure(0, FailureCause::Timeout),
            RetryState::Backoff {
                attempt: 0,
                delay: Duration::from_secs(1),
                cause: FailureCause::Timeout
            }
        );
        assert_eq!(
            config.after_failure(1, FailureCause::Transient),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(2),
                cause: FailureCause::Transient
            }
        );
        assert_eq!(
            config.after_failure(2, FailureCause::Timeout),
            RetryState::Exhausted {
                attempts: 3,
                cause: FailureCause::Timeout
            }
        );
    }

    #[test]
    fn zero_retries_exhausts_immediately() {
        let config = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        assert_eq!(
            config.after_failure(0, FailureCause::Transient),
            RetryState::Exhausted {
                attempts: 1,
                cause: FailureCause::Transient
            }
        );
    }

    #[test]
    fn huge_retry_index_saturates() {
        let config = RetryConfig::default();
        assert!(config.delay_for(64) >= config.delay_for(10));
    }

    #[test]
    fn cause_display() {
        assert_eq!(FailureCause::Timeout.to_string(), "timed out");
        assert_eq!(FailureCause::Transient.to_string(), "transient failure");
    }
}
