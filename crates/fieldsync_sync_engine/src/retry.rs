//! Retry with exponential backoff.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `op` until it succeeds, fails with a non-retryable error, or runs
/// out of retries.
///
/// Non-retryable errors return immediately, without delay.
pub async fn retry_with_backoff<R, F, Fut>(
    config: &RetryConfig,
    label: &str,
    op: F,
) -> SyncResult<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<R>>,
{
    retry_with_backoff_notify(config, label, op, |_, _| {}).await
}

/// Like [`retry_with_backoff`], calling `on_retry(retry, delay)` before each
/// backoff sleep.
pub async fn retry_with_backoff_notify<R, F, Fut, N>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
    mut on_retry: N,
) -> SyncResult<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<R>>,
    N: FnMut(u32, Duration),
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < config.max_retries => {
                retry += 1;
                let delay = config.delay_for_attempt(retry);
                warn!(
                    label,
                    retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                on_retry(retry, delay);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
