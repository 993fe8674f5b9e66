//! Run metrics published at the start and end of a backup run.
//!
//! Delivery is fire-and-forget: a metric that cannot be sent is logged and
//! the run carries on.

use async_trait::async_trait;
use bridge_traits::{error::Result as BridgeResult, MetricSender};
use core_sync::RunReport;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

/// Fully qualified metric names for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKeys {
    pub heartbeat: String,
    pub unbackuped: String,
    pub exitcode: String,
    pub backuped: String,
    pub backup_files_size: String,
}

impl MetricKeys {
    pub fn new(prefix: &str) -> Self {
        let key = |name: &str| format!("{}.{}", prefix, name);
        Self {
            heartbeat: key("heartbeat"),
            unbackuped: key("unbackuped"),
            exitcode: key("exitcode"),
            backuped: key("backuped"),
            backup_files_size: key("backup_files_size"),
        }
    }
}

/// End-of-run values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    pub failed: usize,
    pub backed_up: usize,
    pub total_size_bytes: u64,
    pub exit_code: i32,
}

impl RunMetrics {
    /// `aborted` marks a run that stopped on a fatal error.
    pub fn from_report(report: &RunReport, aborted: bool) -> Self {
        let exit_code = if aborted || !report.is_success() { 1 } else { 0 };
        Self {
            failed: report.failures.len(),
            backed_up: report.backed_up.len(),
            total_size_bytes: report.total_size_bytes(),
            exit_code,
        }
    }
}

pub async fn send_best_effort(sender: &dyn MetricSender, key: &str, value: &str) {
    if let Err(e) = sender.send_metric(key, value).await {
        warn!(metric = key, error = %e, "Failed to send metric");
    }
}

/// Sends the end-of-run metrics concurrently.
pub async fn publish_run_metrics(sender: &dyn MetricSender, keys: &MetricKeys, metrics: &RunMetrics) {
    let values = [
        (&keys.unbackuped, metrics.failed.to_string()),
        (&keys.exitcode, metrics.exit_code.to_string()),
        (&keys.backuped, metrics.backed_up.to_string()),
        (&keys.backup_files_size, metrics.total_size_bytes.to_string()),
    ];

    join_all(
        values
            .iter()
            .map(|(key, value)| send_best_effort(sender, key.as_str(), value.as_str())),
    )
    .await;
}

/// Sender for hosts without a monitoring agent: metrics only go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyMetricSender;

#[async_trait]
impl MetricSender for LogOnlyMetricSender {
    async fn send_metric(&self, key: &str, value: &str) -> BridgeResult<()> {
        info!(metric = key, value, "Metric");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::BridgeError;
    use core_sync::{FailureRecord, ItemSummary, SyncError};
    use mockall::{mock, predicate::eq};

    mock! {
        Sender {}

        #[async_trait]
        impl MetricSender for Sender {
            async fn send_metric(&self, key: &str, value: &str) -> BridgeResult<()>;
        }
    }

    fn report(successes: usize, failures: usize) -> RunReport {
        let mut report = RunReport::default();
        for i in 0..successes {
            report.backed_up.push(ItemSummary {
                site: "prod".to_string(),
                project: "Sales".to_string(),
                name: format!("Report{i}"),
                id: i.to_string(),
                size: 2,
            });
        }
        for _ in 0..failures {
            report
                .failures
                .push(FailureRecord::harness(SyncError::Worker("boom".to_string())));
        }
        report
    }

    #[test]
    fn test_metric_keys_use_prefix() {
        let keys = MetricKeys::new("content-backup");
        assert_eq!(keys.heartbeat, "content-backup.heartbeat");
        assert_eq!(keys.backup_files_size, "content-backup.backup_files_size");
    }

    #[test]
    fn test_run_metrics_exit_code() {
        let clean = RunMetrics::from_report(&report(2, 0), false);
        assert_eq!(clean.exit_code, 0);
        assert_eq!(clean.backed_up, 2);
        assert_eq!(clean.total_size_bytes, 4 * 1_048_576);

        assert_eq!(RunMetrics::from_report(&report(2, 1), false).exit_code, 1);
        assert_eq!(RunMetrics::from_report(&report(0, 0), true).exit_code, 1);
    }

    #[tokio::test]
    async fn test_publish_sends_every_metric_and_tolerates_failures() {
        let mut sender = MockSender::new();
        sender
            .expect_send_metric()
            .with(eq("cb.unbackuped"), eq("1"))
            .times(1)
            .returning(|_, _| Err(BridgeError::Transient("agent down".to_string())));
        sender
            .expect_send_metric()
            .with(eq("cb.exitcode"), eq("1"))
            .times(1)
            .returning(|_, _| Ok(()));
        sender
            .expect_send_metric()
            .with(eq("cb.backuped"), eq("3"))
            .times(1)
            .returning(|_, _| Ok(()));
        sender
            .expect_send_metric()
            .with(eq("cb.backup_files_size"), eq((6 * 1_048_576u64).to_string()))
            .times(1)
            .returning(|_, _| Ok(()));

        let metrics = RunMetrics::from_report(&report(3, 1), false);
        publish_run_metrics(&sender, &MetricKeys::new("cb"), &metrics).await;
    }
}
