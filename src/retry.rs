use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::error::ArchiverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// How a bounded retry loop ended.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempt: u32 },
    Exhausted { last: ArchiverError },
    /// Not retryable; the loop stopped early.
    Fatal { error: ArchiverError, attempt: u32 },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Calls `op(attempt)` with attempt numbers starting at 1, sleeping
    /// `delay` between failed attempts. Errors for which
    /// [`ArchiverError::is_retryable`] is false end the loop.
    pub fn run<T, C, F>(&self, clock: &C, label: &str, mut op: F) -> RetryOutcome<T>
    where
        C: Clock + ?Sized,
        F: FnMut(u32) -> Result<T, ArchiverError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return RetryOutcome::Succeeded { value, attempt },
                Err(error) if !error.is_retryable() => {
                    return RetryOutcome::Fatal { error, attempt };
                }
                Err(error) => {
                    warn!(
                        %label,
                        attempt,
                        max = self.max_attempts,
                        error = %error,
                        "attempt failed"
                    );
                    if attempt >= self.max_attempts {
                        return RetryOutcome::Exhausted { last: error };
                    }
                    clock.sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}
