//! Bounded-attempt retry with exponential backoff
//!
//! Every external call (mail list/fetch/modify, classify) goes through the
//! same policy: transient errors are retried with doubling delays up to a
//! fixed attempt ceiling, permanent errors return immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::LimitsConfig;
use crate::error::{Result, TriageError};

/// Retry settings resolved once per run
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_attempts: limits.max_attempts,
            initial_delay: Duration::from_millis(limits.initial_backoff_ms),
            max_delay: Duration::from_secs(limits.max_backoff_secs),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts_made: 0,
            next_delay: self.initial_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Explicit backoff state: attempt count and the next delay
///
/// `next_delay_for` returns the wait before the next attempt, or None once
/// the attempt ceiling is reached. A rate-limit error carrying a
/// Retry-After hint stretches the delay to at least that hint.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts_made: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn next_delay_for(&mut self, error: &TriageError) -> Option<Duration> {
        self.attempts_made += 1;
        if self.attempts_made >= self.policy.max_attempts {
            return None;
        }

        let mut delay = self.next_delay;
        if let TriageError::RateLimitExceeded { retry_after } = error {
            delay = delay.max(Duration::from_secs(*retry_after));
        }
        delay = delay.min(self.policy.max_delay);

        self.next_delay = (self.next_delay * 2).min(self.policy.max_delay);
        Some(delay)
    }
}

/// Execute an async operation, retrying transient failures per the policy
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => match backoff.next_delay_for(&e) {
                Some(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        backoff.attempts_made(),
                        policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
