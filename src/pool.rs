// src/pool.rs

//! Bounded-concurrency task executor
//!
//! [`run_bounded`] pulls task factories from a stream one at a time and keeps
//! at most `limit` of them running. Tasks run cooperatively on the calling
//! task through a `FuturesUnordered`, so launch order follows the stream
//! while completion order is whatever the I/O makes it.
//!
//! A failing task never stops the pool. Failures are collected and reported
//! together once every launched task has finished. Cancellation stops new
//! launches; tasks already running are awaited, and observe the same token
//! through their own I/O.

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::future::Future;
use std::num::NonZeroUsize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Aggregate failure of a pool run
#[derive(Debug, Error)]
#[error("{} tasks failed{}", .failures.len(), cancelled_suffix(.cancelled))]
pub struct PoolError<E> {
    /// Every task error, in completion order
    pub failures: Vec<E>,
    /// Whether launching stopped because of cancellation
    pub cancelled: bool,
}

fn cancelled_suffix(cancelled: &bool) -> &'static str {
    if *cancelled { " (cancelled)" } else { "" }
}

enum Step<T, R> {
    Finished(R),
    Pulled(Option<T>),
}

/// Run the tasks produced by `tasks` with at most `limit` in flight
///
/// Each item is a factory called with a clone of `token` at launch time.
/// Returns `Ok(())` only if no task failed and no cancellation was seen.
pub async fn run_bounded<S, F, Fut, E>(
    limit: NonZeroUsize,
    tasks: S,
    token: &CancellationToken,
) -> Result<(), PoolError<E>>
where
    S: Stream<Item = F>,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let limit = limit.get();
    let mut tasks = std::pin::pin!(tasks);
    let mut in_flight = FuturesUnordered::new();
    let mut failures = Vec::new();
    let mut cancelled = false;
    let mut launched = 0usize;

    loop {
        if in_flight.len() >= limit {
            if let Some(Err(e)) = in_flight.next().await {
                failures.push(e);
            }
            continue;
        }

        if token.is_cancelled() {
            cancelled = true;
            break;
        }

        // Keep in-flight tasks moving while the source produces the next one
        let step = tokio::select! {
            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => Step::Finished(outcome),
            next = tasks.next() => Step::Pulled(next),
        };

        match step {
            Step::Finished(Ok(())) => {}
            Step::Finished(Err(e)) => failures.push(e),
            Step::Pulled(Some(task)) => {
                launched += 1;
                in_flight.push(task(token.clone()));
            }
            Step::Pulled(None) => break,
        }
    }

    while let Some(outcome) = in_flight.next().await {
        if let Err(e) = outcome {
            failures.push(e);
        }
    }

    debug!(
        "Pool finished: {} launched, {} failed, cancelled: {}",
        launched,
        failures.len(),
        cancelled
    );

    if failures.is_empty() && !cancelled {
        Ok(())
    } else {
        Err(PoolError { failures, cancelled })
    }
}
