//! Retry with per-attempt timeouts.
//!
//! Every provider call goes through [`with_retry`] so deadline and retry
//! policy live in one place instead of being re-implemented per endpoint.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Run `op` up to `max_attempts` times, racing each attempt against
/// `attempt_timeout` and sleeping `backoff` between attempts.
///
/// A timed-out attempt counts as a failed attempt. Non-retryable errors
/// (see [`Error::is_retryable`]) abort immediately. The error returned is
/// the one from the final attempt.
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    max_attempts: u32,
    backoff: Duration,
    attempt_timeout: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut last_err = Error::Timeout(attempt_timeout);

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(attempt_timeout, op()).await {
            Ok(inner) => inner,
            Err(_elapsed) => Err(Error::Timeout(attempt_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt == attempts {
                    return Err(err);
                }
                tracing::debug!(
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "provider call failed, retrying"
                );
                last_err = err;
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Err(last_err)
}
