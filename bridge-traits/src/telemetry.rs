//! Telemetry and Alerting Abstractions
//!
//! Fire-and-forget ports for run metrics and error capture. Failures in these
//! ports must never abort a sync run; callers log and continue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Metric delivery port (monitoring agent, push gateway, ...)
#[async_trait]
pub trait MetricSender: Send + Sync {
    async fn send_metric(&self, key: &str, value: &str) -> Result<()>;
}

/// Context attached to a captured error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Where the error happened (e.g. "transfer", "sweep", "pool")
    pub category: String,
    pub fields: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Error reporting port (crash/telemetry capture service)
pub trait ErrorReporter: Send + Sync {
    fn capture_error(&self, error: &(dyn std::error::Error + 'static), context: &ErrorContext);
}

/// Telemetry implementation that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl MetricSender for NoopTelemetry {
    async fn send_metric(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

impl ErrorReporter for NoopTelemetry {
    fn capture_error(&self, _error: &(dyn std::error::Error + 'static), _context: &ErrorContext) {}
}
