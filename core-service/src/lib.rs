//! Core service façade.
//!
//! This crate wires host-provided bridge implementations (content source,
//! object stores, telemetry, clock) together with a [`BackupConfig`] and runs
//! the configured backup plan: the all-sites job first, then every
//! project-scoped job. Hosts authenticate their bridges before handing them
//! over; nothing here knows about credentials.
//!
//! ```ignore
//! use core_service::{BackupDependencies, BackupService};
//!
//! let service = BackupService::new(config, BackupDependencies::new(source, stores));
//! let run = service.run().await?;
//! std::process::exit(run.exit_code());
//! ```

pub mod error;
pub mod metrics;

pub use error::{CoreError, Result};
pub use metrics::{LogOnlyMetricSender, MetricKeys, RunMetrics};

use std::sync::Arc;

use bridge_traits::{
    Clock, ErrorReporter, MetricSender, NoopTelemetry, SourceSystem, StoreResolver, SystemClock,
};
use core_runtime::config::BackupConfig;
use core_sync::{
    result_channel, FailureRecord, ResultSink, RunReport, SiteBackupRequest, SiteRunSummary,
    SyncConfig, SyncCoordinator, SyncError,
};
use tracing::{error, info, instrument, warn};

/// Aggregated handle to all bridge dependencies the service requires.
pub struct BackupDependencies {
    pub source: Arc<dyn SourceSystem>,
    pub stores: Arc<dyn StoreResolver>,
    pub metrics: Arc<dyn MetricSender>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub clock: Arc<dyn Clock>,
}

impl BackupDependencies {
    /// Metrics go to the log, captured errors are dropped, time is the system clock.
    pub fn new(source: Arc<dyn SourceSystem>, stores: Arc<dyn StoreResolver>) -> Self {
        Self {
            source,
            stores,
            metrics: Arc::new(LogOnlyMetricSender),
            reporter: Arc::new(NoopTelemetry),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricSender>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Result of one complete run of the backup plan.
#[derive(Debug)]
pub struct BackupRun {
    pub sites: Vec<SiteRunSummary>,
    pub report: RunReport,
}

impl BackupRun {
    pub fn exit_code(&self) -> i32 {
        if self.report.is_success() {
            0
        } else {
            1
        }
    }
}

/// Primary façade exposed to host applications.
pub struct BackupService {
    config: BackupConfig,
    deps: BackupDependencies,
}

impl BackupService {
    pub fn new(config: BackupConfig, deps: BackupDependencies) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Engine settings derived from the loaded configuration.
    pub fn sync_config(&self) -> SyncConfig {
        let main = &self.config.main;
        let retry = &self.config.retry;
        SyncConfig {
            max_workers: main.max_workers,
            sweep_workers: main.sweep_workers,
            staleness_days: self.config.retention.staleness_days,
            transfer_attempts: retry.transfer_attempts,
            state_write_attempts: retry.state_write_attempts,
            retry_base_delay_ms: retry.base_delay_ms,
            retry_max_delay_ms: retry.max_delay_ms,
            staging_dir: main.workdir.clone(),
            state_file_name: main.state_file_name.clone(),
            fidelity_opt_out_tag: main.fidelity_opt_out_tag.clone(),
            sync_timeout_secs: main.sync_timeout_secs,
        }
    }

    /// Runs every configured job and publishes the run metrics.
    ///
    /// Non-fatal failures end up in the returned report. A fatal failure
    /// (authentication) stops the remaining jobs; metrics are still sent
    /// with exit code 1 before the error is returned.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<BackupRun> {
        let keys = MetricKeys::new(&self.config.metrics.prefix);
        metrics::send_best_effort(self.deps.metrics.as_ref(), &keys.heartbeat, "1").await;

        let (sink, mut collector) = result_channel();
        let coordinator = SyncCoordinator::new(
            self.sync_config(),
            Arc::clone(&self.deps.source),
            Arc::clone(&self.deps.reporter),
            Arc::clone(&self.deps.clock),
            sink.clone(),
        );

        let outcome = self.run_plan(&coordinator, &sink).await;
        let report = collector.drain();

        let run_metrics = RunMetrics::from_report(&report, outcome.is_err());
        metrics::publish_run_metrics(self.deps.metrics.as_ref(), &keys, &run_metrics).await;

        if !report.backed_up.is_empty() {
            info!("Backed up items:\n{}", report.render_backed_up_table());
        }
        if !report.failures.is_empty() {
            error!("Failed items:\n{}", report.render_failure_table());
        }
        info!(
            backed_up = run_metrics.backed_up,
            failed = run_metrics.failed,
            total_size_bytes = run_metrics.total_size_bytes,
            exit_code = run_metrics.exit_code,
            "Backup run finished"
        );

        let sites = outcome?;
        Ok(BackupRun { sites, report })
    }

    async fn run_plan(
        &self,
        coordinator: &SyncCoordinator,
        sink: &ResultSink,
    ) -> Result<Vec<SiteRunSummary>> {
        let mut summaries = Vec::new();

        if let Some(job) = &self.config.backup.sites {
            info!(bucket = %job.bucket, "Running all-sites job");
            let result = match self.deps.stores.open_bucket(&job.bucket).await {
                Ok(store) => {
                    coordinator
                        .full_backup(store, &job.only_sites, &job.excluded_sites)
                        .await
                }
                Err(e) => Err(SyncError::Destination(e)),
            };
            match result {
                Ok(sites) => summaries.extend(sites),
                Err(e) => self.job_failed("sites_job", e, sink)?,
            }
        }

        for job in &self.config.backup.projects {
            info!(site = %job.site, bucket = %job.bucket, projects = ?job.projects, "Running project job");
            let result = match self.deps.stores.open_bucket(&job.bucket).await {
                Ok(store) => {
                    let request = SiteBackupRequest::whole_site(job.site.as_str(), store)
                        .with_projects(job.projects.clone());
                    coordinator.backup_site(request).await
                }
                Err(e) => Err(SyncError::Destination(e)),
            };
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => self.job_failed("project_job", e, sink)?,
            }
        }

        Ok(summaries)
    }

    /// Fatal errors propagate; anything else is recorded and the plan goes on.
    fn job_failed(&self, category: &str, error: SyncError, sink: &ResultSink) -> Result<()> {
        if error.is_fatal() {
            error!(job = category, error = %error, "Backup job aborted");
            return Err(error.into());
        }
        warn!(job = category, error = %error, "Backup job failed, continuing with the next job");
        sink.report_failure(
            self.deps.reporter.as_ref(),
            category,
            FailureRecord::harness(error),
        );
        Ok(())
    }
}
