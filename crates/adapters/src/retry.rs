use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: usize,
    pub sleep: Duration,
}

impl RetryConfig {
    pub const fn new(max_retries: usize, sleep: Duration) -> Self {
        Self { max_retries, sleep }
    }

    pub const fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::single_attempt()
    }
}

/// Runs `f` up to `max_retries` times. With a single attempt the error is
/// returned as-is; otherwise the last error is wrapped in
/// [`AdapterError::RetryExhausted`].
pub fn call_with_retry<F, T>(mut f: F, config: &RetryConfig) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.max_retries.max(1);
    let mut last_error: Option<AdapterError> = None;

    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempts > 1 {
                    warn!(
                        "[call_with_retry] attempt {}/{} failed: {}",
                        attempt, attempts, err
                    );
                }
                if attempt < attempts {
                    thread::sleep(config.sleep);
                }
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or(AdapterError::EmptyResponse);
    if attempts == 1 {
        Err(err)
    } else {
        Err(AdapterError::retry_exhausted(attempts, err))
    }
}
