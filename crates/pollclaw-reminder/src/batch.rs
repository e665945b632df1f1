//! Concurrency-bounded batch runner with per-item failure isolation.
//!
//! Items are processed in chunks of `batch_size`; within a chunk every
//! worker future runs concurrently and a failing item never cancels its
//! siblings. Failures are re-queued with an attempt counter and retried in
//! their own chunks up to `max_retries`, then recorded as permanent
//! errors. Throughput shaping is cooperative: the inter-chunk delay is a
//! tokio sleep, never a blocking wait.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use pollclaw_core::error::PollClawError;
use pollclaw_core::types::BatchOutcome;

/// Decides whether a failed item gets another attempt.
pub type RetryPredicate<T> = Arc<dyn Fn(&T, &PollClawError, usize) -> bool + Send + Sync>;

/// Tuning for one batch run.
pub struct BatchOptions<T> {
    /// Concurrent workers per chunk.
    pub batch_size: usize,
    /// Attempts after the first, per item.
    pub max_retries: usize,
    /// Cooperative pause between chunks. `None` disables.
    pub batch_delay: Option<Duration>,
    /// Wall-clock budget: chunks not yet started when this instant passes
    /// are skipped (the in-flight chunk always finishes).
    pub deadline: Option<Instant>,
    /// Extra gate on retries; defaults to retrying every failure.
    pub retry_if: Option<RetryPredicate<T>>,
}

impl<T> BatchOptions<T> {
    pub fn new(batch_size: usize, max_retries: usize) -> Self {
        Self {
            batch_size,
            max_retries,
            batch_delay: None,
            deadline: None,
            retry_if: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        if !delay.is_zero() {
            self.batch_delay = Some(delay);
        }
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry_if(mut self, pred: RetryPredicate<T>) -> Self {
        self.retry_if = Some(pred);
        self
    }
}

struct Attempt<T> {
    item: T,
    attempt: usize,
}

/// Run `worker` over `items` under the given options.
///
/// `label` names an item in logs and in the permanent-error ledger.
pub async fn run_batched<T, F, Fut, L>(
    items: Vec<T>,
    opts: BatchOptions<T>,
    label: L,
    worker: F,
) -> BatchOutcome
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), PollClawError>>,
    L: Fn(&T) -> String,
{
    let batch_size = opts.batch_size.max(1);
    let mut outcome = BatchOutcome::default();
    let mut queue: Vec<Attempt<T>> = items
        .into_iter()
        .map(|item| Attempt { item, attempt: 0 })
        .collect();
    let mut first_chunk = true;

    while !queue.is_empty() {
        if let Some(deadline) = opts.deadline {
            if Instant::now() >= deadline {
                outcome.skipped += queue.len();
                tracing::warn!(
                    skipped = queue.len(),
                    "pass budget exhausted, skipping remaining batch items"
                );
                break;
            }
        }
        if !first_chunk {
            if let Some(delay) = opts.batch_delay {
                tokio::time::sleep(delay).await;
            }
        }
        first_chunk = false;

        let take = batch_size.min(queue.len());
        let chunk: Vec<Attempt<T>> = queue.drain(..take).collect();
        let results = join_all(
            chunk
                .iter()
                .map(|attempt| worker(attempt.item.clone())),
        )
        .await;

        for (attempt, result) in chunk.into_iter().zip(results) {
            match result {
                Ok(()) => outcome.processed += 1,
                Err(err) => {
                    let wants_retry = attempt.attempt < opts.max_retries
                        && opts
                            .retry_if
                            .as_ref()
                            .map(|p| p(&attempt.item, &err, attempt.attempt + 1))
                            .unwrap_or(true);
                    if wants_retry {
                        tracing::debug!(
                            item = %label(&attempt.item),
                            attempt = attempt.attempt + 1,
                            error = %err,
                            "batch item failed, queuing retry"
                        );
                        outcome.retried += 1;
                        queue.push(Attempt {
                            item: attempt.item,
                            attempt: attempt.attempt + 1,
                        });
                    } else {
                        tracing::warn!(
                            item = %label(&attempt.item),
                            error = %err,
                            "batch item failed permanently"
                        );
                        outcome.errors.push((label(&attempt.item), err.to_string()));
                    }
                }
            }
        }
    }

    outcome
}
