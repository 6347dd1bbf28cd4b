//! Retry with exponential backoff for transient connection errors

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use crate::connection::ConnectionError;

/// How often and how patiently to retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
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

    /// Delay after the given (0-indexed) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// A config that tries exactly once
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
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ConnectionError, delay: Duration);
}

/// Logs retries at warn level, tagged with what is being retried
pub struct LogRetry<'a>(pub &'a str);

impl RetryCallback for LogRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ConnectionError, delay: Duration) {
        log::warn!(
            "{}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {}ms",
            self.0,
            delay.as_millis()
        );
    }
}

/// Run `operation`, retrying retryable errors with backoff
///
/// Non-retryable errors return immediately. After the last attempt the last
/// error is returned.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ConnectionError>
where
    F: FnMut() -> Result<T, ConnectionError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
