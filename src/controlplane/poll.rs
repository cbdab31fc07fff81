//! Bounded polling
//!
//! Polls a condition at a fixed interval until it holds or the timeout is
//! reached. The condition itself swallows its own errors and reports `false`.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Check after every `interval` until `condition` holds; the first check
/// happens after one interval
pub async fn poll<F, Fut>(interval: Duration, timeout: Duration, operation: &str, condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(interval, timeout, operation, false, condition).await
}

/// Like [`poll`] but checks once before the first sleep
pub async fn poll_immediate<F, Fut>(
    interval: Duration,
    timeout: Duration,
    operation: &str,
    condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(interval, timeout, operation, true, condition).await
}

async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    operation: &str,
    immediate: bool,
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    if immediate && condition().await {
        return Ok(());
    }
    loop {
        if Instant::now() + interval > deadline {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                duration: timeout,
            });
        }
        tokio::time::sleep(interval).await;
        if condition().await {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result = poll(Duration::from_secs(10), Duration::from_secs(240), "health", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }
        })
        .await;

        assert_matches!(result, Err(Error::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 24);
        assert_eq!(started.elapsed(), Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_immediate_succeeds_without_sleeping() {
        let started = Instant::now();
        tokio_test::assert_ok!(
            poll_immediate(Duration::from_secs(10), Duration::from_secs(240), "restore", || async { true }).await
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_when_condition_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        poll(Duration::from_secs(5), Duration::from_secs(60), "ready", || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
