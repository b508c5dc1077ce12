//! Retry policy for adapter operations.
//!
//! Only transient failures (timeouts, an unreachable service manager) are
//! retried. Anything else is returned after the first attempt so that, for
//! example, a permissions problem surfaces immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::types::config::BackoffStrategy;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How many times a transient failure may be retried and how long to wait
/// between attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, strategy: BackoffStrategy, base_delay_ms: u64) -> Self {
        RetryPolicy {
            max_retries,
            strategy,
            base_delay_ms,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy::new(0, BackoffStrategy::Fixed, 0)
    }

    /// Whether the given retry number (0-indexed) is within the budget.
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Delay before the given retry (0 is the first retry after the initial failure).
    pub fn delay_ms(&self, retry: u32) -> u64 {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(retry as u64 + 1),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(retry)),
        }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.delay_ms(retry))
    }
}

impl Default for RetryPolicy {
    /// Default: 3 retries, exponential backoff, 1000ms base delay.
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Retrying
// ---------------------------------------------------------------------------

/// Result of an operation run under a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub result: Result<T, AdapterError>,
    /// Total calls made, including the first.
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails non-transiently, or the retry budget is
/// spent. `sleep` is called with each backoff delay.
pub fn run_with_retry<T, F, S>(policy: &RetryPolicy, mut op: F, mut sleep: S) -> Attempted<T>
where
    F: FnMut() -> Result<T, AdapterError>,
    S: FnMut(Duration),
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) => {
                let retry = attempts - 1;
                if !e.is_transient() || !policy.should_retry(retry) {
                    return Attempted {
                        result: Err(e),
                        attempts,
                    };
                }
                tracing::debug!(attempt = attempts, error = %e, "transient failure, retrying");
                sleep(policy.delay(retry));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
