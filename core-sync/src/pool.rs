//! # Transfer Worker Pool
//!
//! Bounded-concurrency fan-out used for item transfers and retention sweeps.
//!
//! Every task runs on its own tokio task, gated by a semaphore of
//! `max_workers` permits. Tasks never touch shared state; they return a
//! value and the caller folds the [`PoolReport`] serially once the whole
//! batch has finished. A failing task does not affect its siblings, except
//! that a fatal error (authentication) stops the batch from starting new
//! tasks; those are skipped with [`SyncError::Aborted`].
//!
//! The pool's [`CancellationToken`] is a hard stop: once it fires, nothing
//! new starts and tasks still running are aborted and awaited, so no task
//! outlives [`TransferWorkerPool::run`]. A task that panics is reported as a
//! harness failure without an item.

use crate::error::{Result, SyncError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug)]
pub enum PoolFailure<T> {
    /// The task for `item` returned an error
    Task { item: T, error: SyncError },
    /// The pool harness itself failed; no item context is available
    Harness { error: SyncError },
}

impl<T> PoolFailure<T> {
    pub fn error(&self) -> &SyncError {
        match self {
            PoolFailure::Task { error, .. } | PoolFailure::Harness { error } => error,
        }
    }
}

#[derive(Debug)]
pub struct PoolReport<T, R> {
    pub successes: Vec<(T, R)>,
    pub failures: Vec<PoolFailure<T>>,
}

impl<T, R> PoolReport<T, R> {
    fn with_capacity(n: usize) -> Self {
        Self {
            successes: Vec::with_capacity(n),
            failures: Vec::new(),
        }
    }

    /// First fatal error of the batch, if any.
    pub fn fatal_error(&self) -> Option<&SyncError> {
        self.failures
            .iter()
            .map(PoolFailure::error)
            .find(|e| e.is_fatal() && !matches!(e, SyncError::Aborted(_)))
    }
}

#[derive(Debug, Clone)]
pub struct TransferWorkerPool {
    max_workers: usize,
    cancel: CancellationToken,
}

impl TransferWorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Shares an externally owned token, e.g. one per site run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `task` for every item and waits for all of them.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> PoolReport<T, R>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        // Tripped by a fatal task error, or by the pool token through the parent link
        let stop_scheduling = self.cancel.child_token();
        let mut report = PoolReport::with_capacity(items.len());
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = stop_scheduling.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                report.failures.push(PoolFailure::Task {
                    item,
                    error: SyncError::Aborted("run cancelled before task started".to_string()),
                });
                continue;
            };

            let on_fatal = stop_scheduling.clone();
            let work = task(item.clone());
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = work.await;
                if let Err(e) = &result {
                    if e.is_fatal() {
                        warn!(error = %e, "Fatal task failure, skipping remaining work");
                        on_fatal.cancel();
                    }
                }
                result
            });
            handles.push((item, handle));
        }

        for (item, mut handle) in handles {
            let joined = tokio::select! {
                biased;
                joined = &mut handle => joined,
                _ = self.cancel.cancelled() => {
                    handle.abort();
                    handle.await
                }
            };

            match joined {
                Ok(Ok(value)) => report.successes.push((item, value)),
                Ok(Err(error)) => report.failures.push(PoolFailure::Task { item, error }),
                Err(e) if e.is_cancelled() => {
                    debug!("Running task aborted");
                    report.failures.push(PoolFailure::Task {
                        item,
                        error: SyncError::Aborted("run cancelled while task was running".to_string()),
                    });
                }
                Err(e) => {
                    error!(error = %e, "Task panicked");
                    report.failures.push(PoolFailure::Harness {
                        error: SyncError::Worker(e.to_string()),
                    });
                }
            }
        }

        debug!(
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            "Worker pool batch finished"
        );
        report
    }
}

/// Resolves to [`SyncError::Aborted`] as soon as `cancel` fires.
///
/// Only for futures that own no spawned work: dropping them must stop them.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Aborted("site run cancelled".to_string())),
        result = work => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_items_complete_within_worker_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = TransferWorkerPool::new(3);

        let report = pool
            .run((0..20).collect::<Vec<u32>>(), |n| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(n * 2)
                }
            })
            .await;

        assert_eq!(report.successes.len(), 20);
        assert!(report.failures.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let mut items: Vec<u32> = report.successes.iter().map(|(n, _)| *n).collect();
        items.sort();
        assert_eq!(items, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let pool = TransferWorkerPool::new(4);
        let report = pool
            .run(vec![1u32, 2, 3, 4], |n| async move {
                if n % 2 == 0 {
                    Err(SyncError::Source(BridgeError::Transient(format!("item {n}"))))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(report.successes.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.fatal_error().is_none());
        for failure in &report.failures {
            assert!(matches!(failure, PoolFailure::Task { item, .. } if item % 2 == 0));
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_a_harness_failure() {
        let pool = TransferWorkerPool::new(2);
        let report = pool
            .run(vec![1u32, 2], |n| async move {
                if n == 2 {
                    panic!("boom");
                }
                Ok(n)
            })
            .await;

        assert_eq!(report.successes.len(), 1);
        assert!(matches!(
            report.failures.as_slice(),
            [PoolFailure::Harness {
                error: SyncError::Worker(_)
            }]
        ));
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_pending_items() {
        let pool = TransferWorkerPool::new(1);
        let report = pool
            .run(vec![1u32, 2, 3], |n| async move {
                if n == 1 {
                    Err(SyncError::Destination(BridgeError::Unauthorized(
                        "token expired".to_string(),
                    )))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert!(report.successes.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert!(report.fatal_error().is_some());
        let aborted = report
            .failures
            .iter()
            .filter(|f| matches!(f.error(), SyncError::Aborted(_)))
            .count();
        assert_eq!(aborted, 2);
        // A fatal error only stops this batch; the pool stays usable
        assert!(!pool.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_running_tasks_before_returning() {
        let token = CancellationToken::new();
        let pool = TransferWorkerPool::new(2).with_cancellation(token.clone());
        let finished = Arc::new(AtomicUsize::new(0));

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let report = pool
            .run(vec![1u32, 2, 3, 4], |n| {
                let finished = Arc::clone(&finished);
                async move {
                    if n > 1 {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                }
            })
            .await;
        canceller.await.unwrap();

        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f, PoolFailure::Task { error: SyncError::Aborted(_), .. })));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
