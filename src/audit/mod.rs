//! Audit trail for runs and job executions.
//!
//! Sinks never fail the caller: a write error is logged and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

use crate::domain::RunSummary;
use crate::error::Result;
use crate::id::generate_audit_id;

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    RunSummary,
    JobCompleted,
    JobFailed,
    /// Trigger fired while the previous execution was still running
    JobSkipped,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::RunSummary => "run_summary",
            AuditKind::JobCompleted => "job_completed",
            AuditKind::JobFailed => "job_failed",
            AuditKind::JobSkipped => "job_skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub job: String,
    pub kind: AuditKind,
    pub message: String,
    pub data: Value,
}

impl AuditEntry {
    pub fn new(job: impl Into<String>, kind: AuditKind, message: impl Into<String>) -> Self {
        Self {
            id: generate_audit_id(),
            at: Utc::now(),
            job: job.into(),
            kind,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Entry for the end of a batch pass, carrying the full summary.
    pub fn run_summary(summary: &RunSummary) -> Self {
        let data = serde_json::to_value(summary).unwrap_or(Value::Null);
        Self::new(&summary.job, AuditKind::RunSummary, summary.headline()).with_data(data)
    }
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Record an entry, logging instead of propagating failures.
pub fn record_quietly(sink: &dyn AuditSink, entry: &AuditEntry) {
    if let Err(e) = sink.record(entry) {
        log::warn!("Failed to write audit entry {} for {}: {}", entry.kind.as_str(), entry.job, e);
    }
}

/// Writes entries through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        match entry.kind {
            AuditKind::JobFailed => log::error!("[audit] {} {}: {}", entry.job, entry.kind.as_str(), entry.message),
            AuditKind::JobSkipped => log::warn!("[audit] {} {}: {}", entry.job, entry.kind.as_str(), entry.message),
            _ => log::info!("[audit] {} {}: {}", entry.job, entry.kind.as_str(), entry.message),
        }
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: AuditKind) -> Vec<AuditEntry> {
        self.entries().into_iter().filter(|e| e.kind == kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
        Ok(())
    }
}

/// Fans an entry out to several sinks.
pub struct TeeAuditSink {
    sinks: Vec<std::sync::Arc<dyn AuditSink>>,
}

impl TeeAuditSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for TeeAuditSink {
    fn record(&self, entry: &AuditEntry) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(entry) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
