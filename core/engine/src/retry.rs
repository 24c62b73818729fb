//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use davsync_common::{Error, Result};

/// Run `operation` up to `max_attempts` times, returning on first success.
///
/// Between attempts (not after the last) the current delay is slept and
/// then doubled: `base_delay`, `2 × base_delay`, `4 × base_delay`, …
/// There is no jitter and no cap; the caller picks a sane base delay.
/// Every failure is retried identically; no error is treated as fatal
/// before the attempts run out.
///
/// # Errors
/// [`Error::TransferExhausted`] wrapping the last underlying error once
/// all attempts fail.
pub async fn retry<F, Fut, T>(
    max_attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut last_error: Option<Error> = None;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < max_attempts {
                    warn!(
                        "attempt {}/{} failed: {} - retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                    delay *= 2;
                } else {
                    last_error = Some(err);
                }
            }
        }
    }

    Err(Error::TransferExhausted {
        attempts: max_attempts,
        source: Box::new(last_error.unwrap_or_else(|| {
            // max_attempts >= 1 is enforced by SyncConfig::validate
            Error::InvalidConfig("retry called with zero attempts".to_string())
        })),
    })
}
