//! Bounded polling combinator
//!
//! The Seoudi location sub-flow waits on three dependent dropdowns that
//! enable themselves asynchronously; element waits elsewhere share the
//! same shape. `poll_until` retries a fallible probe at a fixed
//! interval and gives up after a bounded number of attempts.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Outcome of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe succeeded within the attempt budget.
    Ready(T),
    /// All attempts were exhausted without success.
    Exhausted,
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Exhausted => None,
        }
    }
}

/// Run `probe` up to `max_attempts` times, `interval` apart, until it
/// yields `Some`. The first attempt runs immediately.
pub async fn poll_until<T, F, Fut>(
    max_attempts: u32,
    interval: Duration,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=max_attempts {
        if let Some(value) = probe().await {
            return PollOutcome::Ready(value);
        }
        if attempt < max_attempts {
            debug!(attempt, max_attempts, "probe not ready, polling again");
            tokio::time::sleep(interval).await;
        }
    }
    PollOutcome::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_once_probe_is_ready() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until(5, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= 3).then_some(n)
        })
        .await;
        assert_eq!(outcome.into_option(), Some(3));
    }

    #[tokio::test]
    async fn exhausts_after_budget() {
        let outcome: PollOutcome<()> =
            poll_until(3, Duration::from_millis(1), || async { None }).await;
        assert!(!outcome.is_ready());
    }

    #[tokio::test]
    async fn first_attempt_runs_immediately() {
        let outcome = poll_until(1, Duration::from_secs(60), || async { Some(7) }).await;
        assert_eq!(outcome.into_option(), Some(7));
    }
}
