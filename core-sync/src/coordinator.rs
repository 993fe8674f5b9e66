//! # Sync Coordinator
//!
//! Orchestrates incremental backups of sites from a source system into a
//! destination store.
//!
//! ## Overview
//!
//! The `SyncCoordinator` composes the engine per site. It coordinates:
//! - Site selection and entering via `SourceSystem`
//! - Project path resolution via `HierarchyIndex`
//! - Loading and persisting the per-site `SyncState`
//! - Change detection against the live listing via `ChangeDetector`
//! - Concurrent transfers via `TransferWorkerPool` and `ItemTransfer`
//! - Retention refreshes via `RetentionSweeper`
//!
//! ## Workflow
//!
//! 1. Find and enter the site (a missing site is skipped with a warning)
//! 2. Build the project hierarchy and the owner directory
//! 3. Load the site's sync state
//! 4. List items and diff them against state within the job scope
//! 5. Refresh tombstoned objects and drop their state entries
//! 6. Transfer new and changed items concurrently
//! 7. Apply successful transfers to state, serially
//! 8. Sweep stale objects under the site prefix
//! 9. Persist the state document
//!
//! With `sync_timeout_secs` set, a per-site cancellation token bounds the
//! whole run; in-flight work is aborted and awaited before the site returns.
//!
//! Worker tasks never touch the state map. They return outcomes to this
//! coordinator and push report records into the shared [`ResultSink`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{result_channel, SiteBackupRequest, SyncConfig, SyncCoordinator};
//!
//! let (sink, mut collector) = result_channel();
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), source, reporter, clock, sink);
//!
//! let summary = coordinator
//!     .backup_site(SiteBackupRequest::whole_site("prod", store))
//!     .await?;
//! let report = collector.drain();
//! ```

use crate::{
    detector::{ChangeDetector, ChangeSet, SyncScope},
    hierarchy::HierarchyIndex,
    pool::{until_cancelled, PoolFailure, TransferWorkerPool},
    report::{RunId, SiteRunStatus, SiteRunSummary},
    retry::RetryPolicy,
    sink::{FailureRecord, ItemSummary, ResultSink},
    state::{SyncState, SyncStateStore},
    sweeper::RetentionSweeper,
    transfer::ItemTransfer,
    Result, SyncError,
};
use bridge_traits::{Clock, DestinationStore, ErrorReporter, SourceSystem};
use core_runtime::config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent item transfers
    pub max_workers: usize,

    /// Maximum concurrent refreshes during a retention sweep
    pub sweep_workers: usize,

    /// Objects untouched for this many whole days get refreshed
    pub staleness_days: i64,

    /// Attempt budget for downloads, uploads and refreshes
    pub transfer_attempts: u32,

    /// Attempt budget for state document reads and writes
    pub state_write_attempts: u32,

    /// Base delay for exponential backoff (milliseconds)
    pub retry_base_delay_ms: u64,

    /// Backoff cap (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Local staging root; each item stages under a hex-encoded id directory
    pub staging_dir: PathBuf,

    pub state_file_name: String,

    pub fidelity_opt_out_tag: String,

    /// Deadline for one site run (seconds)
    pub sync_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_workers: config::DEFAULT_MAX_WORKERS,
            sweep_workers: config::DEFAULT_SWEEP_WORKERS,
            staleness_days: config::DEFAULT_STALENESS_DAYS,
            transfer_attempts: config::DEFAULT_TRANSFER_ATTEMPTS,
            state_write_attempts: config::DEFAULT_STATE_WRITE_ATTEMPTS,
            retry_base_delay_ms: config::DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: config::DEFAULT_RETRY_MAX_DELAY_MS,
            staging_dir: std::env::temp_dir().join("content-backup"),
            state_file_name: config::DEFAULT_STATE_FILE_NAME.to_string(),
            fidelity_opt_out_tag: config::DEFAULT_FIDELITY_OPT_OUT_TAG.to_string(),
            sync_timeout_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn transfer_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.transfer_attempts).with_backoff(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn state_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.state_write_attempts).with_backoff(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

/// One site backed up into one store, optionally limited to project subtrees.
#[derive(Clone)]
pub struct SiteBackupRequest {
    pub site_name: String,
    pub store: Arc<dyn DestinationStore>,
    /// Project paths such as `Sales/Q1`; empty means the whole site
    pub projects: Vec<String>,
}

impl SiteBackupRequest {
    pub fn whole_site(site_name: impl Into<String>, store: Arc<dyn DestinationStore>) -> Self {
        Self {
            site_name: site_name.into(),
            store,
            projects: Vec::new(),
        }
    }

    pub fn with_projects(mut self, projects: Vec<String>) -> Self {
        self.projects = projects;
        self
    }
}

/// Sync coordinator for orchestrating site backups
pub struct SyncCoordinator {
    config: SyncConfig,
    source: Arc<dyn SourceSystem>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    sink: ResultSink,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn SourceSystem>,
        reporter: Arc<dyn ErrorReporter>,
        clock: Arc<dyn Clock>,
        sink: ResultSink,
    ) -> Self {
        Self {
            config,
            source,
            reporter,
            clock,
            sink,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Backs up every site except `excluded_sites`, restricted to
    /// `only_sites` when that list is non-empty.
    ///
    /// Sites run one after another. A site that fails for a non-fatal reason
    /// is reported and the next site still runs; fatal errors stop the job.
    #[instrument(skip(self, store))]
    pub async fn full_backup(
        &self,
        store: Arc<dyn DestinationStore>,
        only_sites: &[String],
        excluded_sites: &[String],
    ) -> Result<Vec<SiteRunSummary>> {
        let sites = self.source.list_sites().await.map_err(SyncError::Source)?;
        let selected: Vec<String> = sites
            .into_iter()
            .map(|site| site.name)
            .filter(|name| !excluded_sites.contains(name))
            .filter(|name| only_sites.is_empty() || only_sites.contains(name))
            .collect();

        info!(sites = selected.len(), "Starting backup of all sites");

        let mut summaries = Vec::with_capacity(selected.len());
        for site_name in selected {
            let request = SiteBackupRequest::whole_site(site_name.clone(), Arc::clone(&store));
            match self.backup_site(request).await {
                Ok(summary) => summaries.push(summary),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(site = %site_name, error = %e, "Site backup failed");
                    self.sink.report_failure(
                        self.reporter.as_ref(),
                        "site",
                        FailureRecord::harness(e),
                    );
                }
            }
        }

        Ok(summaries)
    }

    /// Runs one site, bounded by `sync_timeout_secs` when configured.
    ///
    /// At the deadline the site's cancellation token fires: running transfers
    /// and refreshes are aborted and awaited, entries that already succeeded
    /// are persisted, and the run returns [`SyncError::Timeout`]. Nothing
    /// started for this site keeps running after it returns.
    pub async fn backup_site(&self, request: SiteBackupRequest) -> Result<SiteRunSummary> {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let execution = self.execute_site(run_id, &request, cancel.clone());

        let Some(secs) = self.config.sync_timeout_secs else {
            return execution.await;
        };

        tokio::pin!(execution);
        let deadline = tokio::time::sleep(Duration::from_secs(secs));
        tokio::pin!(deadline);

        tokio::select! {
            result = &mut execution => result,
            _ = &mut deadline => {
                error!(site = %request.site_name, timeout_secs = secs, "Site backup timed out, stopping in-flight work");
                cancel.cancel();
                match execution.await {
                    Err(SyncError::Aborted(_)) => Err(SyncError::Timeout(secs)),
                    other => other,
                }
            }
        }
    }

    #[instrument(skip(self, request, cancel), fields(run_id = %run_id, site = %request.site_name))]
    async fn execute_site(
        &self,
        run_id: RunId,
        request: &SiteBackupRequest,
        cancel: CancellationToken,
    ) -> Result<SiteRunSummary> {
        let started_at = self.clock.now();
        let site_name = request.site_name.as_str();
        info!(projects = ?request.projects, "Backing up site");

        let Some(prepared) = until_cancelled(&cancel, self.prepare_site(request)).await? else {
            return Ok(SiteRunSummary::skipped(run_id, site_name, started_at));
        };
        let PreparedSite {
            state_store,
            mut state,
            changes,
            owners,
        } = prepared;

        let mut failed = changes.unresolved.len();
        for (item, error) in changes.unresolved {
            self.sink.report_failure(
                self.reporter.as_ref(),
                "transfer",
                FailureRecord::for_item(error, &item),
            );
        }

        let sweeper = RetentionSweeper::new(
            Arc::clone(&request.store),
            TransferWorkerPool::new(self.config.sweep_workers).with_cancellation(cancel.clone()),
            self.config.transfer_retry(),
            Arc::clone(&self.clock),
            self.sink.clone(),
            Arc::clone(&self.reporter),
        );

        // Phase 5: Tombstones
        info!("Phase 5: Refreshing {} removed items", changes.tombstones.len());
        let mut tombstoned = 0;
        for tombstone in changes.tombstones {
            match until_cancelled(&cancel, sweeper.refresh(&tombstone.object_key)).await {
                Ok(()) => {
                    state.remove(&tombstone.path);
                    tombstoned += 1;
                }
                Err(e) if e.is_fatal() => {
                    return self.stop_site(&state_store, site_name, &state, e).await;
                }
                Err(e) => {
                    warn!(object_key = %tombstone.object_key, error = %e, "Failed to refresh removed item, keeping state entry");
                    failed += 1;
                    self.sink.report_failure(
                        self.reporter.as_ref(),
                        "tombstone",
                        FailureRecord::for_object(e, tombstone.object_key),
                    );
                }
            }
        }

        // Phase 6: Transfers
        info!("Phase 6: Transferring {} items", changes.candidates.len());
        let transfer = ItemTransfer::new(
            Arc::clone(&self.source),
            Arc::clone(&request.store),
            self.config.staging_dir.clone(),
            self.config.transfer_retry(),
            Arc::clone(&self.clock),
        )
        .with_owners(owners)
        .with_opt_out_tag(self.config.fidelity_opt_out_tag.as_str());

        let pool = TransferWorkerPool::new(self.config.max_workers).with_cancellation(cancel.clone());
        let sink = self.sink.clone();
        let report = pool
            .run(changes.candidates, |candidate| {
                let transfer = transfer.clone();
                let sink = sink.clone();
                async move {
                    let outcome = transfer.transfer(&candidate).await?;
                    sink.record_success(ItemSummary::from(&candidate.item));
                    Ok::<_, SyncError>(outcome)
                }
            })
            .await;

        // Phase 7: Apply outcomes serially
        info!("Phase 7: Applying transfer results");
        let fatal = report.fatal_error().map(ToString::to_string);
        let transferred = report.successes.len();
        for (candidate, outcome) in report.successes {
            if let Some(entry) = outcome.entry {
                state.insert(candidate.path, entry);
            }
        }
        failed += report.failures.len();
        for failure in report.failures {
            self.route_transfer_failure(failure);
        }

        if let Some(reason) = fatal {
            error!(reason = %reason, "Fatal error during transfers, skipping retention sweep");
            return self
                .stop_site(&state_store, site_name, &state, SyncError::Aborted(reason))
                .await;
        }
        if cancel.is_cancelled() {
            return self.stop_site(&state_store, site_name, &state, cancelled()).await;
        }

        // Phase 8: Retention sweep
        info!("Phase 8: Sweeping stale objects");
        let refreshed = match sweeper
            .sweep(&format!("{}/", site_name), self.config.staleness_days)
            .await
        {
            Ok(_) if cancel.is_cancelled() => {
                return self.stop_site(&state_store, site_name, &state, cancelled()).await;
            }
            Ok(summary) => {
                failed += summary.failed;
                summary.refreshed
            }
            Err(e) if e.is_fatal() => {
                return self.stop_site(&state_store, site_name, &state, e).await;
            }
            Err(e) => {
                error!(error = %e, "Retention sweep failed");
                failed += 1;
                self.sink.report_failure(
                    self.reporter.as_ref(),
                    "retention_sweep",
                    FailureRecord::harness(e),
                );
                0
            }
        };

        // Phase 9: Persist
        info!("Phase 9: Persisting sync state");
        state_store.save(site_name, &state).await?;

        let summary = SiteRunSummary {
            run_id,
            site: site_name.to_string(),
            status: SiteRunStatus::Completed,
            started_at,
            finished_at: self.clock.now(),
            transferred,
            failed,
            unchanged: changes.unchanged,
            tombstoned,
            refreshed,
        };
        info!(
            transferred = summary.transferred,
            failed = summary.failed,
            unchanged = summary.unchanged,
            tombstoned = summary.tombstoned,
            refreshed = summary.refreshed,
            "Site backup completed"
        );
        Ok(summary)
    }

    /// Phases 1 to 4. `None` when the site does not exist. Owns no spawned
    /// work, so it can be dropped at any await point.
    async fn prepare_site(&self, request: &SiteBackupRequest) -> Result<Option<PreparedSite>> {
        let site_name = request.site_name.as_str();

        // Phase 1: Enter site
        info!("Phase 1: Entering site");
        let sites = self.source.list_sites().await.map_err(SyncError::Source)?;
        let Some(site) = sites.into_iter().find(|s| s.name == site_name) else {
            warn!("Site not found");
            return Ok(None);
        };
        self.source.enter_site(&site).await.map_err(SyncError::Source)?;

        // Phase 2: Hierarchy and owners
        info!("Phase 2: Building project hierarchy");
        let projects = self.source.list_projects().await.map_err(SyncError::Source)?;
        let index = HierarchyIndex::build(projects)?;
        let owners = self.load_owners().await?;
        info!(projects = index.len(), users = owners.len(), "Project hierarchy built");

        // Phase 3: State
        info!("Phase 3: Loading sync state");
        let state_store = SyncStateStore::new(
            Arc::clone(&request.store),
            self.config.state_file_name.as_str(),
            self.config.state_retry(),
        );
        let state = state_store.load(site_name).await?;

        // Phase 4: Diff
        info!("Phase 4: Detecting changes");
        let scope = SyncScope::resolve(&index, site_name, &request.projects);
        let items = self.source.list_items().await.map_err(SyncError::Source)?;
        let listed = items.len();
        let changes = ChangeDetector::new(&index, site_name).detect(items, &state, &scope);
        info!(
            listed,
            candidates = changes.candidates.len(),
            tombstones = changes.tombstones.len(),
            unchanged = changes.unchanged,
            "Change detection finished"
        );

        Ok(Some(PreparedSite {
            state_store,
            state,
            changes,
            owners,
        }))
    }

    async fn load_owners(&self) -> Result<HashMap<String, String>> {
        match self.source.list_users().await {
            Ok(users) => Ok(users.into_iter().map(|u| (u.id, u.name)).collect()),
            Err(e) if e.is_fatal() => Err(SyncError::Source(e)),
            Err(e) => {
                warn!(error = %e, "Failed to list users, owner tags will be empty");
                Ok(HashMap::new())
            }
        }
    }

    fn route_transfer_failure(&self, failure: PoolFailure<crate::detector::TransferCandidate>) {
        match failure {
            PoolFailure::Task { item: candidate, error } => {
                if matches!(error, SyncError::Aborted(_)) {
                    self.sink
                        .record_failure(FailureRecord::for_item(error, &candidate.item));
                    return;
                }
                warn!(path = %candidate.path, error = %error, "Item transfer failed");
                self.sink.report_failure(
                    self.reporter.as_ref(),
                    "transfer",
                    FailureRecord::for_item(error, &candidate.item),
                );
            }
            PoolFailure::Harness { error } => {
                error!(error = %error, "Transfer worker failed outside item context");
                self.sink.report_failure(
                    self.reporter.as_ref(),
                    "transfer_harness",
                    FailureRecord::harness(error),
                );
            }
        }
    }

    /// Persists what the run achieved so far, then returns `error`.
    async fn stop_site(
        &self,
        state_store: &SyncStateStore,
        site: &str,
        state: &SyncState,
        error: SyncError,
    ) -> Result<SiteRunSummary> {
        if let Err(e) = state_store.save(site, state).await {
            error!(error = %e, "Failed to persist sync state after abort");
        }
        Err(error)
    }
}

struct PreparedSite {
    state_store: SyncStateStore,
    state: SyncState,
    changes: ChangeSet,
    owners: HashMap<String, String>,
}

fn cancelled() -> SyncError {
    SyncError::Aborted("site run cancelled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::result_channel;
    use async_trait::async_trait;
    use bridge_traits::{
        BridgeError, ContentItem, NoopTelemetry, ObjectSummary, ObjectTags, ProjectNode, Site,
        SourceUser, SystemClock,
    };
    use bytes::Bytes;
    use mockall::mock;
    use std::path::Path;

    type BridgeResult<T> = bridge_traits::error::Result<T>;

    mock! {
        Source {}

        #[async_trait]
        impl SourceSystem for Source {
            async fn list_sites(&self) -> BridgeResult<Vec<Site>>;
            async fn enter_site(&self, site: &Site) -> BridgeResult<()>;
            async fn list_users(&self) -> BridgeResult<Vec<SourceUser>>;
            async fn list_projects(&self) -> BridgeResult<Vec<ProjectNode>>;
            async fn list_items(&self) -> BridgeResult<Vec<ContentItem>>;
            async fn download_item(&self, item_id: &str, full_fidelity: bool, staging_path: &Path) -> BridgeResult<PathBuf>;
        }
    }

    mock! {
        Store {}

        #[async_trait]
        impl DestinationStore for Store {
            async fn put_document(&self, key: &str, body: Bytes) -> BridgeResult<()>;
            async fn get_document(&self, key: &str) -> BridgeResult<Bytes>;
            async fn upload_file(&self, local_path: &Path, key: &str, tags: &ObjectTags) -> BridgeResult<()>;
            async fn refresh_timestamp(&self, key: &str) -> BridgeResult<()>;
            async fn list_objects(&self, prefix: &str) -> BridgeResult<Vec<ObjectSummary>>;
        }
    }

    fn coordinator(source: MockSource, sink: ResultSink) -> SyncCoordinator {
        SyncCoordinator::new(
            SyncConfig::default(),
            Arc::new(source),
            Arc::new(NoopTelemetry),
            Arc::new(SystemClock),
            sink,
        )
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_workers, 6);
        assert_eq!(config.staleness_days, 60);
        assert_eq!(config.state_file_name, "upload_state.json");
        assert_eq!(config.transfer_retry().max_attempts(), 6);
        assert_eq!(config.state_retry().max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_missing_site_is_skipped_without_touching_state() {
        let mut source = MockSource::new();
        source
            .expect_list_sites()
            .returning(|| Ok(vec![Site::new("other", "other")]));
        source.expect_enter_site().never();

        let mut store = MockStore::new();
        store.expect_get_document().never();
        store.expect_put_document().never();

        let (sink, _collector) = result_channel();
        let summary = coordinator(source, sink)
            .backup_site(SiteBackupRequest::whole_site("prod", Arc::new(store)))
            .await
            .unwrap();

        assert_eq!(summary.status, SiteRunStatus::Skipped);
        assert_eq!(summary.site, "prod");
    }

    #[tokio::test]
    async fn test_source_auth_failure_is_fatal() {
        let mut source = MockSource::new();
        source
            .expect_list_sites()
            .returning(|| Err(BridgeError::Unauthorized("bad credentials".to_string())));

        let (sink, _collector) = result_channel();
        let err = coordinator(source, sink)
            .full_backup(Arc::new(MockStore::new()), &[], &[])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_cyclic_hierarchy_fails_site_but_full_backup_continues() {
        let mut source = MockSource::new();
        source.expect_list_sites().returning(|| {
            Ok(vec![
                Site::new("broken", "broken"),
                Site::new("excluded", "excluded"),
            ])
        });
        source.expect_enter_site().returning(|_| Ok(()));
        source.expect_list_projects().returning(|| {
            Ok(vec![
                ProjectNode::child("a", "b", "A"),
                ProjectNode::child("b", "a", "B"),
            ])
        });

        let (sink, mut collector) = result_channel();
        let summaries = coordinator(source, sink)
            .full_backup(Arc::new(MockStore::new()), &[], &["excluded".to_string()])
            .await
            .unwrap();

        assert!(summaries.is_empty());
        let report = collector.drain();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, SyncError::HierarchyCycle { .. }));
    }
}
