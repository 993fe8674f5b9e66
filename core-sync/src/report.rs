//! Run outcome aggregation and plain-text report tables.

use crate::sink::{FailureRecord, ItemSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub const BYTES_PER_MB: u64 = 1_048_576;

/// Identifier attached to one site run in logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteRunStatus {
    Completed,
    /// The site does not exist on the source
    Skipped,
}

/// Counters for one site run. Item details go through the result sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteRunSummary {
    pub run_id: RunId,
    pub site: String,
    pub status: SiteRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub transferred: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub tombstoned: usize,
    pub refreshed: usize,
}

impl SiteRunSummary {
    pub fn skipped(run_id: RunId, site: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            site: site.into(),
            status: SiteRunStatus::Skipped,
            started_at: at,
            finished_at: at,
            transferred: 0,
            failed: 0,
            unchanged: 0,
            tombstoned: 0,
            refreshed: 0,
        }
    }
}

/// Everything that was stored or failed across a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub backed_up: Vec<ItemSummary>,
    pub failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.backed_up
            .iter()
            .map(|item| item.size.saturating_mul(BYTES_PER_MB))
            .sum()
    }

    pub fn merge(&mut self, other: RunReport) {
        self.backed_up.extend(other.backed_up);
        self.failures.extend(other.failures);
    }

    pub fn render_backed_up_table(&self) -> String {
        let mut out = String::from("|| site || project || name ||");
        for item in &self.backed_up {
            out.push_str(&format!("\n| {} | {} | {} |", item.site, item.project, item.name));
        }
        out
    }

    /// Failures without item context show the object key, if any, as name.
    pub fn render_failure_table(&self) -> String {
        let mut out = String::from("|| site || project || name || id || error ||");
        for failure in &self.failures {
            let row = match &failure.item {
                Some(item) => format!(
                    "\n| {} | {} | {} | {} | {} |",
                    item.site, item.project, item.name, item.id, failure.error
                ),
                None => format!(
                    "\n| - | - | {} | - | {} |",
                    failure.object_key.as_deref().unwrap_or("-"),
                    failure.error
                ),
            };
            out.push_str(&row);
        }
        out
    }
}
