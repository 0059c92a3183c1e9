//! Retry with exponential backoff for transient apply failures

use crate::context::CancelToken;
use crate::error::ApplyError;
use std::time::Duration;

/// Backoff settings for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Delay after the given failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// A config that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Notified before each retry
pub trait RetryCallback {
    /// `attempt` is the 1-indexed attempt that just failed
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ApplyError, delay: Duration);
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ApplyError>,
    /// Number of attempts made
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails non-transiently or runs out of
/// attempts.
///
/// `operation` receives the 1-indexed attempt number. Cancellation stops
/// further retries and returns the last error.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    cancel: &CancelToken,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Result<T, ApplyError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation(attempt) {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        if !error.is_transient() || attempt >= max_attempts || cancel.is_cancelled() {
            return Attempted {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if let Some(cb) = callback {
            cb.on_retry(attempt, max_attempts, &error, delay);
        }
        if !cancel.sleep(delay) {
            return Attempted {
                result: Err(error),
                attempts: attempt,
            };
        }
    }
}
