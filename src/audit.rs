//! Usage audit trail.
//!
//! The dispatcher reports every command that changes a bucket or hands out
//! its contents to an [`AuditSink`].
//! Recording is best effort: a sink error is logged by the caller and
//! never fails the command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// One audited operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub bucket: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub object_name: Option<String>,
    pub size: Option<u64>,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(bucket: &str, operation: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            user_id: None,
            operation: operation.to_string(),
            object_name: None,
            size: None,
            status: AuditStatus::Success,
            error: None,
            at: Utc::now(),
        }
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// Writes records to the `bucketfs::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        info!(
            target: "bucketfs::audit",
            id = %record.id,
            bucket = %record.bucket,
            user = record.user_id.as_deref().unwrap_or("-"),
            operation = %record.operation,
            object = record.object_name.as_deref().unwrap_or("-"),
            size = record.size.unwrap_or(0),
            status = ?record.status,
            error = record.error.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Keeps records in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("audit record buffer poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_records() {
        let sink = MemoryAuditSink::default();
        let mut record = AuditRecord::new("files", "upload");
        record.object_name = Some("a.txt".into());
        record.size = Some(3);
        sink.record(&record).unwrap();
        TracingAuditSink.record(&record).unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, record.id);
        assert_eq!(records[0].status, AuditStatus::Success);
    }

    #[test]
    fn test_record_serializes() {
        let mut record = AuditRecord::new("files", "rm");
        record.status = AuditStatus::Failure;
        record.error = Some("boom".into());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["operation"], "rm");
        assert_eq!(json["error"], "boom");
    }
}
