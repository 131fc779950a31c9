use crate::schema::{Metric, MetricResult};
use chrono::{DateTime, Utc};
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// One calculation attempt. `value` is set iff the attempt succeeded,
/// `error` iff it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditEntry {
    pub metric: Metric,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: AuditStatus,
    #[serde(
        default,
        with = "crate::utils::optional_nan_as_null",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<f64>")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn is_success(&self) -> bool {
        self.status == AuditStatus::Success
    }
}

/// Append-only ledger for a single engine run.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    run_id: String,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_success(&mut self, result: &MetricResult) {
        info!(
            "[{}] {} = {} ({} detail values)",
            self.run_id,
            result.metric,
            result.value,
            result.details.len()
        );
        self.entries.push(AuditEntry {
            metric: result.metric,
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            status: AuditStatus::Success,
            value: Some(result.value),
            details: result.details.clone(),
            error: None,
        });
    }

    pub fn record_failure(&mut self, metric: Metric, error: &str) {
        warn!("[{}] {} failed: {}", self.run_id, metric, error);
        self.entries.push(AuditEntry {
            metric,
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            status: AuditStatus::Failed,
            value: None,
            details: BTreeMap::new(),
            error: Some(error.to_string()),
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| !e.is_success())
    }

    /// Most recent successful entry for `metric`, if any.
    pub fn latest_success(&self, metric: Metric) -> Option<&AuditEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.metric == metric && e.is_success())
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }
}
