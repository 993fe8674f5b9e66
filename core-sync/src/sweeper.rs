//! # Retention Sweeper
//!
//! Keeps stored objects alive under an external expiry policy by refreshing
//! the modification timestamp (copy-to-self) of every object under a site
//! prefix that has not been touched for `staleness_days` whole days.
//!
//! Refreshes fan out over a [`TransferWorkerPool`]; a failed refresh is
//! reported and recorded but never stops the sweep. Cancelling the pool's
//! token stops the listing and aborts refreshes still running.

use crate::error::{Result, SyncError};
use crate::pool::{until_cancelled, PoolFailure, TransferWorkerPool};
use crate::retry::RetryPolicy;
use crate::sink::{FailureRecord, ResultSink};
use bridge_traits::{Clock, DestinationStore, ErrorReporter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub scanned: usize,
    pub stale: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Whole days elapsed since `last_modified` reach the horizon.
pub fn is_stale(now: DateTime<Utc>, last_modified: DateTime<Utc>, staleness_days: i64) -> bool {
    (now - last_modified).num_days() >= staleness_days
}

pub struct RetentionSweeper {
    store: Arc<dyn DestinationStore>,
    pool: TransferWorkerPool,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    sink: ResultSink,
    reporter: Arc<dyn ErrorReporter>,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn DestinationStore>,
        pool: TransferWorkerPool,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        sink: ResultSink,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            pool,
            retry,
            clock,
            sink,
            reporter,
        }
    }

    /// Refreshes one object's timestamp. Also used for tombstones.
    pub async fn refresh(&self, object_key: &str) -> Result<()> {
        refresh_object(Arc::clone(&self.store), self.retry, object_key.to_string()).await
    }

    /// Listing failures propagate; per-object refresh failures do not.
    #[instrument(skip(self))]
    pub async fn sweep(&self, prefix: &str, staleness_days: i64) -> Result<SweepSummary> {
        let store = Arc::clone(&self.store);
        let list_prefix = prefix.to_string();
        let listing = self.retry.run("list_objects", move || {
            let store = Arc::clone(&store);
            let prefix = list_prefix.clone();
            async move {
                store
                    .list_objects(&prefix)
                    .await
                    .map_err(SyncError::Destination)
            }
        });
        let objects = until_cancelled(&self.pool.cancellation_token(), listing).await?;

        let now = self.clock.now();
        let stale: Vec<String> = objects
            .iter()
            .filter(|o| is_stale(now, o.last_modified, staleness_days))
            .map(|o| o.key.clone())
            .collect();

        let mut summary = SweepSummary {
            scanned: objects.len(),
            stale: stale.len(),
            ..Default::default()
        };
        info!(
            scanned = summary.scanned,
            stale = summary.stale,
            staleness_days,
            "Refreshing stale objects"
        );

        let store = Arc::clone(&self.store);
        let retry = self.retry;
        let report = self
            .pool
            .run(stale, |key| refresh_object(Arc::clone(&store), retry, key))
            .await;

        summary.refreshed = report.successes.len();
        summary.failed = report.failures.len();

        for failure in report.failures {
            match failure {
                PoolFailure::Task {
                    item: key,
                    error: error @ SyncError::Aborted(_),
                } => {
                    self.sink.record_failure(FailureRecord::for_object(error, key));
                }
                PoolFailure::Task { item: key, error } => {
                    warn!(object_key = %key, error = %error, "Failed to refresh object timestamp");
                    self.sink.report_failure(
                        self.reporter.as_ref(),
                        "retention_sweep",
                        FailureRecord::for_object(error, key),
                    );
                }
                PoolFailure::Harness { error } => {
                    error!(error = %error, "Retention sweep worker failed");
                    self.sink.report_failure(
                        self.reporter.as_ref(),
                        "retention_sweep_harness",
                        FailureRecord::harness(error),
                    );
                }
            }
        }

        info!(
            refreshed = summary.refreshed,
            failed = summary.failed,
            "Retention sweep finished"
        );
        Ok(summary)
    }
}

async fn refresh_object(store: Arc<dyn DestinationStore>, retry: RetryPolicy, key: String) -> Result<()> {
    retry
        .run("refresh_timestamp", || {
            let store = Arc::clone(&store);
            let key = key.clone();
            async move {
                store
                    .refresh_timestamp(&key)
                    .await
                    .map_err(SyncError::Destination)
            }
        })
        .await
}
