//! Shared exponential-backoff-with-jitter utility.
//!
//! Every external-service connector (source DB, search backend, KV
//! store) is wrapped with [`retry_connect`], narrowing the retryable
//! error set with its own predicate, mirroring the Python original's
//! per-connector `@backoff.on_exception` decorations. The bulk-write
//! path uses the attempt-bounded [`retry_bounded`] instead, since a
//! batch write must eventually surface rather than retry forever.

use crate::error::{Result, SyncError};
use backoff::backoff::Backoff;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

/// Cap shared by every connector's exponential backoff (§5): no
/// connector waits longer than this between reconnection attempts.
const MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(5);

fn connector_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(MAX_BACKOFF_INTERVAL)
        .with_max_elapsed_time(None)
        .build()
}

/// Retries `op` indefinitely with exponential backoff (capped at 5s),
/// as long as `is_retryable` accepts the error it produced. A
/// non-retryable error surfaces immediately.
pub async fn retry_connect<T, F, Fut>(
    label: &str,
    is_retryable: impl Fn(&anyhow::Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempt = AtomicU32::new(0);
    let outcome = retry(connector_backoff(), || async {
        let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
        match op().await {
            Ok(v) => Ok(v),
            Err(err) => {
                if is_retryable(&err) {
                    warn!(target: "sync_core::retry", label, attempt = n, error = %err, "retrying after transient error");
                    Err(BackoffError::transient(err))
                } else {
                    Err(BackoffError::Permanent(err))
                }
            }
        }
    })
    .await;

    outcome.map_err(SyncError::RetriesExhausted)
}

/// Retries `op` up to `max_attempts` times with exponential backoff
/// (capped at 5s), surfacing the last error once attempts are
/// exhausted. Used for the bulk-write path, which must eventually
/// surface rather than retry forever.
pub async fn retry_bounded<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    is_retryable: impl Fn(&anyhow::Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut backoff = connector_backoff();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let retryable = is_retryable(&err);
                if !retryable || attempt >= max_attempts {
                    return Err(SyncError::RetriesExhausted(err));
                }
                let wait = backoff.next_backoff().unwrap_or(MAX_BACKOFF_INTERVAL);
                warn!(
                    target: "sync_core::retry",
                    label,
                    attempt,
                    max_attempts,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "retrying after failed attempt"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_connect_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_connect(
            "test",
            |_e| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("transient failure {n}")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_connect_surfaces_non_retryable_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_connect(
            "test",
            |_e| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { anyhow::bail!("permanent failure") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_bounded_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_bounded(
            "bulk-write",
            5,
            |_e| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { anyhow::bail!("always fails") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn retry_bounded_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_bounded(
            "bulk-write",
            5,
            |_e| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        anyhow::bail!("not yet")
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
