//! Append-only outcome channels shared by worker tasks.
//!
//! Workers push [`ItemSummary`] and [`FailureRecord`] values into a cloned
//! [`ResultSink`]; the owner drains the paired [`ResultCollector`] into a
//! [`RunReport`] after the run. Nothing else is shared between tasks.

use crate::error::SyncError;
use crate::report::RunReport;
use bridge_traits::{ContentItem, ErrorContext, ErrorReporter};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// The part of an item worth reporting once it is gone from memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub site: String,
    pub project: String,
    pub name: String,
    pub id: String,
    /// Megabytes, as reported by the source
    pub size: u64,
}

impl From<&ContentItem> for ItemSummary {
    fn from(item: &ContentItem) -> Self {
        Self {
            site: item.site.clone(),
            project: item.project_name.clone(),
            name: item.name.clone(),
            id: item.id.clone(),
            size: item.size,
        }
    }
}

#[derive(Debug)]
pub struct FailureRecord {
    pub error: SyncError,
    /// `None` when the failure happened outside any item context
    pub item: Option<ItemSummary>,
    pub object_key: Option<String>,
}

impl FailureRecord {
    pub fn for_item(error: SyncError, item: &ContentItem) -> Self {
        Self {
            error,
            item: Some(item.into()),
            object_key: None,
        }
    }

    pub fn for_object(error: SyncError, object_key: impl Into<String>) -> Self {
        Self {
            error,
            item: None,
            object_key: Some(object_key.into()),
        }
    }

    pub fn harness(error: SyncError) -> Self {
        Self {
            error,
            item: None,
            object_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultSink {
    successes: mpsc::UnboundedSender<ItemSummary>,
    failures: mpsc::UnboundedSender<FailureRecord>,
}

impl ResultSink {
    pub fn record_success(&self, item: ItemSummary) {
        if self.successes.send(item).is_err() {
            debug!("Result collector dropped, success not recorded");
        }
    }

    pub fn record_failure(&self, record: FailureRecord) {
        if self.failures.send(record).is_err() {
            debug!("Result collector dropped, failure not recorded");
        }
    }

    /// Captures the error with the reporter, then records it.
    pub fn report_failure(&self, reporter: &dyn ErrorReporter, category: &str, record: FailureRecord) {
        let mut context = ErrorContext::new(category);
        if let Some(item) = &record.item {
            context = context
                .with_field("site", item.site.as_str())
                .with_field("project", item.project.as_str())
                .with_field("name", item.name.as_str())
                .with_field("item_id", item.id.as_str());
        }
        if let Some(key) = &record.object_key {
            context = context.with_field("object_key", key.as_str());
        }
        reporter.capture_error(&record.error, &context);
        self.record_failure(record);
    }
}

#[derive(Debug)]
pub struct ResultCollector {
    successes: mpsc::UnboundedReceiver<ItemSummary>,
    failures: mpsc::UnboundedReceiver<FailureRecord>,
}

impl ResultCollector {
    /// Takes everything recorded so far.
    pub fn drain(&mut self) -> RunReport {
        let mut report = RunReport::default();
        while let Ok(item) = self.successes.try_recv() {
            report.backed_up.push(item);
        }
        while let Ok(record) = self.failures.try_recv() {
            report.failures.push(record);
        }
        report
    }
}

pub fn result_channel() -> (ResultSink, ResultCollector) {
    let (success_tx, success_rx) = mpsc::unbounded_channel();
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    (
        ResultSink {
            successes: success_tx,
            failures: failure_tx,
        },
        ResultCollector {
            successes: success_rx,
            failures: failure_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str) -> ItemSummary {
        ItemSummary {
            site: "prod".to_string(),
            project: "Q1".to_string(),
            name: name.to_string(),
            id: name.to_lowercase(),
            size: 2,
        }
    }

    #[tokio::test]
    async fn test_records_from_many_tasks_are_collected() {
        let (sink, mut collector) = result_channel();

        let mut handles = Vec::new();
        for i in 0..10 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    sink.record_failure(FailureRecord::harness(SyncError::Worker(format!("task {i}"))));
                } else {
                    sink.record_success(summary(&format!("Item{i}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = collector.drain();
        assert_eq!(report.backed_up.len(), 6);
        assert_eq!(report.failures.len(), 4);
        assert!(collector.drain().backed_up.is_empty());
    }

    #[test]
    fn test_report_failure_captures_context() {
        struct Capture(std::sync::Mutex<Vec<ErrorContext>>);
        impl ErrorReporter for Capture {
            fn capture_error(&self, _error: &(dyn std::error::Error + 'static), context: &ErrorContext) {
                self.0.lock().unwrap().push(context.clone());
            }
        }

        let reporter = Capture(std::sync::Mutex::new(Vec::new()));
        let (sink, mut collector) = result_channel();
        sink.report_failure(
            &reporter,
            "sweep",
            FailureRecord::for_object(SyncError::Worker("copy".to_string()), "prod/a.twbx"),
        );

        let captured = reporter.0.lock().unwrap();
        assert_eq!(captured[0].category, "sweep");
        assert_eq!(captured[0].fields.get("object_key"), Some(&"prod/a.twbx".to_string()));
        assert_eq!(collector.drain().failures.len(), 1);
    }

    #[test]
    fn test_recording_after_collector_dropped_is_silent() {
        let (sink, collector) = result_channel();
        drop(collector);
        sink.record_success(summary("Late"));
        sink.record_failure(FailureRecord::for_object(
            SyncError::Worker("late".to_string()),
            "prod/a.twbx",
        ));
    }
}
