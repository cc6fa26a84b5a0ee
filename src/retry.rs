// src/retry.rs

//! Retry with exponential backoff and cancellation
//!
//! [`retry`] drives a fallible async operation through a fixed schedule of
//! delays. After every failure an `on_error` hook sees the error and the
//! number of attempts still left; it may change state the next attempt
//! reads (the driver swaps a package's download URL this way) or stop the
//! loop early by returning [`ControlFlow::Break`].

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: usize = 10;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for a single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How a retry loop ended without success
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; errors are in attempt order
    #[error("all {} attempts failed", .0.len())]
    Exhausted(Vec<E>),

    /// The error hook refused further attempts after this error
    #[error("gave up after a non-retryable failure")]
    GaveUp(E),

    /// Cancellation was requested; errors seen so far are kept
    #[error("cancelled after {} failed attempts", .0.len())]
    Cancelled(Vec<E>),
}

impl<E> RetryError<E> {
    /// The most recent underlying error, if any attempt ran
    pub fn last(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted(errors) | RetryError::Cancelled(errors) => errors.last(),
            RetryError::GaveUp(error) => Some(error),
        }
    }

    /// Consume into the most recent underlying error
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Exhausted(mut errors) | RetryError::Cancelled(mut errors) => errors.pop(),
            RetryError::GaveUp(error) => Some(error),
        }
    }
}

/// Exponential backoff schedule
///
/// Produces `retries` delays starting at `base`, multiplied by `factor`
/// each step and clamped to `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub retries: usize,
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base: DEFAULT_BASE_DELAY,
            factor: 2,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Set the number of retries
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay ceiling
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Set the first delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Materialize the delay between consecutive attempts
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.retries);
        let mut current = self.base.min(self.max);
        for _ in 0..self.retries {
            delays.push(current);
            current = current.saturating_mul(self.factor).min(self.max);
        }
        delays
    }
}

/// Sleep for `duration` unless `token` is cancelled first
///
/// Returns `false` when the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `op` until it succeeds, the delays run out, or `token` is cancelled
///
/// `op` receives the zero-based attempt index. On failure `on_error` gets the
/// error and the attempts remaining (`delays.len() - attempt`); returning
/// `Break` ends the loop with [`RetryError::GaveUp`]. With `delays` of length
/// `t`, an always-failing `op` runs `t + 1` times.
pub async fn retry<T, E, Op, Fut, OnError>(
    mut op: Op,
    delays: &[Duration],
    mut on_error: OnError,
    token: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnError: FnMut(&E, usize) -> ControlFlow<()>,
{
    let mut errors = Vec::new();

    for attempt in 0..=delays.len() {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled(errors));
        }

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let remaining = delays.len() - attempt;
        if on_error(&error, remaining).is_break() {
            return Err(RetryError::GaveUp(error));
        }
        errors.push(error);

        if let Some(delay) = delays.get(attempt)
            && !sleep_or_cancel(*delay, token).await
        {
            return Err(RetryError::Cancelled(errors));
        }
    }

    Err(RetryError::Exhausted(errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_default_backoff_schedule() {
        let delays = Backoff::default().delays();
        assert_eq!(delays.len(), 10);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[5], Duration::from_secs(32));
        // Clamped to the ceiling from here on
        assert_eq!(delays[6], Duration::from_secs(60));
        assert_eq!(delays[9], Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_ceiling_below_base() {
        let delays = Backoff::default()
            .with_retries(3)
            .with_max(Duration::from_millis(500))
            .delays();
        assert_eq!(delays, vec![Duration::from_millis(500); 3]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_error() {
        let token = CancellationToken::new();
        let delays = vec![Duration::ZERO; 3];
        let calls = Cell::new(0);
        let mut remaining_seen = Vec::new();

        let result: Result<(), _> = retry(
            |attempt| async move { Err::<(), _>(format!("attempt {attempt}")) },
            &delays,
            |_, remaining| {
                calls.set(calls.get() + 1);
                remaining_seen.push(remaining);
                ControlFlow::Continue(())
            },
            &token,
        )
        .await;

        assert_eq!(calls.get(), 4);
        assert_eq!(remaining_seen, vec![3, 2, 1, 0]);
        match result {
            Err(RetryError::Exhausted(errors)) => {
                assert_eq!(errors, vec!["attempt 0", "attempt 1", "attempt 2", "attempt 3"]);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let token = CancellationToken::new();
        let delays = vec![Duration::ZERO; 5];

        let result = retry(
            |attempt| async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            },
            &delays,
            |_, _| ControlFlow::Continue(()),
            &token,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hook_can_give_up() {
        let token = CancellationToken::new();
        let delays = vec![Duration::ZERO; 5];
        let attempts = Cell::new(0);

        let result: Result<(), _> = retry(
            |_| {
                attempts.set(attempts.get() + 1);
                async { Err("fatal") }
            },
            &delays,
            |_, _| ControlFlow::Break(()),
            &token,
        )
        .await;

        assert_eq!(attempts.get(), 1);
        assert!(matches!(result, Err(RetryError::GaveUp("fatal"))));
    }

    #[tokio::test]
    async fn test_hook_state_is_visible_to_next_attempt() {
        let token = CancellationToken::new();
        let delays = vec![Duration::ZERO; 2];
        let url = Cell::new("primary");

        let result = retry(
            |_| {
                let current = url.get();
                async move {
                    if current == "primary" {
                        Err("404")
                    } else {
                        Ok(current)
                    }
                }
            },
            &delays,
            |_, _| {
                url.set("fallback");
                ControlFlow::Continue(())
            },
            &token,
        )
        .await;

        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let delays = vec![Duration::from_secs(3600)];
        let canceller = token.clone();

        let result: Result<(), _> = retry(
            |_| {
                canceller.cancel();
                async { Err("down") }
            },
            &delays,
            |_, _| ControlFlow::Continue(()),
            &token,
        )
        .await;

        match result {
            Err(RetryError::Cancelled(errors)) => assert_eq!(errors, vec!["down"]),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let attempts = Cell::new(0);

        let result: Result<(), RetryError<&str>> = retry(
            |_| {
                attempts.set(attempts.get() + 1);
                async { Ok(()) }
            },
            &[],
            |_, _| ControlFlow::Continue(()),
            &token,
        )
        .await;

        assert_eq!(attempts.get(), 0);
        assert!(matches!(result, Err(RetryError::Cancelled(errors)) if errors.is_empty()));
    }
}
