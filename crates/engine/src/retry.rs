//! Bounded retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use loreforge_store::TaskStoreError;

/// Delay between attempts; short, because transient pool exhaustion and
/// connection blips usually clear quickly.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Run a store operation, retrying transient failures up to `attempts` total
/// tries. Non-transient errors (not-found, conflict, storage bugs) surface
/// immediately.
pub(crate) async fn with_store_retries<T, Fut, F>(
    attempts: u32,
    mut op: F,
) -> Result<T, TaskStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskStoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(attempt, error = %err, "transient store failure, retrying");
                attempt += 1;
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_store_retries(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TaskStoreError::Unavailable("blip".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_store_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TaskStoreError::Unavailable("down".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_store_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TaskStoreError::Storage("broken".into())) }
        })
        .await;

        assert!(!result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
