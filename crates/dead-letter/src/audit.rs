//! Audit trail port

use crate::record::DeadLetterRecord;
use crate::DeadLetterError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::info;

pub type AuditContext = HashMap<String, String>;

/// Audit collaborator: failures and dead-letters are recorded here
#[async_trait]
pub trait AuditService: Send + Sync {
    async fn record_failure(
        &self,
        event_id: &str,
        source: &str,
        reason: &str,
        correlation_id: Option<&str>,
        context: &AuditContext,
    ) -> Result<(), DeadLetterError>;

    async fn record_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Failure,
    DeadLetter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub event_id: String,
    pub source: String,
    pub reason: String,
    pub correlation_id: Option<String>,
    pub context: AuditContext,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded in-memory audit log
pub struct InMemoryAuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl InMemoryAuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn push(&self, entry: AuditEntry) {
        info!(
            kind = ?entry.kind,
            event_id = %entry.event_id,
            source = %entry.source,
            reason = %entry.reason,
            "Audit entry recorded"
        );
        let mut entries = self.entries.lock();
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.entries.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl AuditService for InMemoryAuditLog {
    async fn record_failure(
        &self,
        event_id: &str,
        source: &str,
        reason: &str,
        correlation_id: Option<&str>,
        context: &AuditContext,
    ) -> Result<(), DeadLetterError> {
        self.push(AuditEntry {
            kind: AuditKind::Failure,
            event_id: event_id.to_string(),
            source: source.to_string(),
            reason: reason.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            context: context.clone(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut context = AuditContext::new();
        context.insert("recordId".into(), record.id.clone());
        context.insert("failureClass".into(), record.failure_class.to_string());
        context.insert("attemptCount".into(), record.attempt_count.to_string());
        context.insert("consumerName".into(), record.consumer_name.clone());

        self.push(AuditEntry {
            kind: AuditKind::DeadLetter,
            event_id: record.idempotency_key.to_string(),
            source: record.envelope.source_topic().to_string(),
            reason: record.error_reason.clone(),
            correlation_id: record.correlation_id().map(str::to_string),
            context,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retention_and_ordering() {
        let log = InMemoryAuditLog::new(2);
        for id in ["a", "b", "c"] {
            log.record_failure(id, "topic", "boom", None, &AuditContext::new())
                .await
                .unwrap();
        }
        assert_eq!(log.len(), 2);
        let recent = log.recent(10);
        assert_eq!(recent[0].event_id, "c");
        assert_eq!(recent[1].event_id, "b");
        assert_eq!(log.count(AuditKind::Failure), 2);
    }
}
