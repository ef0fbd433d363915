//! Retry-with-delay combinator used to follow queued builds.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteRunError, Result};

/// Default delay between two build-info requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Shared cancellation flag checked by [`retry_with_delay`] on every
/// iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `attempt` until it yields a value, sleeping `interval` between
/// attempts. There is no upper bound on the number of attempts; the loop
/// only ends early when `cancel` is raised.
pub async fn retry_with_delay<T, F, Fut>(
    interval: Duration,
    cancel: Option<&CancellationFlag>,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let cancelled = || cancel.is_some_and(CancellationFlag::is_cancelled);
    loop {
        if cancelled() {
            return Err(RemoteRunError::Cancelled);
        }
        if let Some(value) = attempt().await {
            return Ok(value);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_value() {
        let calls = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();
        let value = retry_with_delay(Duration::from_secs(10), None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { (n == 3).then_some(n) }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop() {
        let flag = CancellationFlag::new();
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_delay(Duration::from_secs(1), Some(&flag), || {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                flag.cancel();
            }
            async { None }
        })
        .await;

        assert!(matches!(result, Err(RemoteRunError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let flag = CancellationFlag::new();
        flag.cancel();
        let result: Result<u8> =
            retry_with_delay(Duration::from_secs(1), Some(&flag), || async { Some(1) }).await;
        assert!(matches!(result, Err(RemoteRunError::Cancelled)));
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(PollConfig::default().interval, Duration::from_secs(10));
    }
}
