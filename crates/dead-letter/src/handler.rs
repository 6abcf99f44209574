//! Manual-intervention escalation for dead-lettered events

use crate::audit::AuditService;
use crate::record::{DeadLetterRecord, DeadLetterStatus};
use crate::store::InMemoryDeadLetterStore;
use alerting::{AlertingService, NotificationContext, Severity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Which escalation steps succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub stored: bool,
    pub notified: bool,
    pub audited: bool,
    /// Sub-step failures, logged and never propagated
    pub errors: Vec<String>,
}

impl EscalationReport {
    pub fn is_complete(&self) -> bool {
        self.stored && self.notified && self.audited
    }
}

/// Final stage for records that reached the dead-letter destination:
/// persist them for review, page someone, and write the audit entry.
pub struct DeadLetterHandler {
    store: Arc<InMemoryDeadLetterStore>,
    alerting: Arc<dyn AlertingService>,
    audit: Arc<dyn AuditService>,
    escalated_total: AtomicU64,
}

impl DeadLetterHandler {
    pub fn new(
        store: Arc<InMemoryDeadLetterStore>,
        alerting: Arc<dyn AlertingService>,
        audit: Arc<dyn AuditService>,
    ) -> Self {
        Self {
            store,
            alerting,
            audit,
            escalated_total: AtomicU64::new(0),
        }
    }

    /// Every step runs even if an earlier one failed
    pub async fn escalate(&self, record: &DeadLetterRecord) -> EscalationReport {
        let mut report = EscalationReport::default();
        self.escalated_total.fetch_add(1, Ordering::Relaxed);

        error!(
            id = %record.id,
            topic = %record.envelope.source_topic(),
            class = %record.failure_class,
            attempts = record.attempt_count,
            "Event dead-lettered, manual intervention required"
        );

        let mut stored = record.clone();
        stored.status = DeadLetterStatus::RequiresManualIntervention;
        match self.store.insert(stored) {
            Ok(()) => report.stored = true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Failed to store dead-letter record");
                report.errors.push(e.to_string());
            }
        }

        let message = format!(
            "CRITICAL: {} event {} from {} in dead-letter after {} attempts: {}",
            record.envelope.event_type(),
            record.idempotency_key,
            record.envelope.coordinates(),
            record.attempt_count,
            record.error_reason
        );
        let mut context = NotificationContext::new();
        context.insert("recordId".into(), record.id.clone());
        context.insert("subjectId".into(), record.envelope.subject_id().to_string());
        context.insert("failureClass".into(), record.failure_class.to_string());
        context.insert("consumerName".into(), record.consumer_name.clone());
        context.insert("action".into(), "requires manual intervention".into());
        match self
            .alerting
            .notify("DEAD_LETTER", Severity::Critical, &message, &context)
            .await
        {
            Ok(()) => report.notified = true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Dead-letter notification failed");
                report.errors.push(e.to_string());
            }
        }

        match self.audit.record_dead_letter(record).await {
            Ok(()) => report.audited = true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Dead-letter audit failed");
                report.errors.push(e.to_string());
            }
        }

        report
    }

    pub fn escalated_total(&self) -> u64 {
        self.escalated_total.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<InMemoryDeadLetterStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditKind, InMemoryAuditLog};
    use alerting::AlertError;
    use async_trait::async_trait;
    use chrono::Utc;
    use event_model::{CriticalityTier, EventEnvelope, FailureClass};
    use parking_lot::Mutex;

    struct Pager {
        fail: bool,
        pages: Mutex<Vec<(String, Severity)>>,
    }

    #[async_trait]
    impl AlertingService for Pager {
        async fn notify(
            &self,
            kind: &str,
            severity: Severity,
            _message: &str,
            _context: &NotificationContext,
        ) -> Result<(), AlertError> {
            if self.fail {
                return Err(AlertError::Delivery("pager down".into()));
            }
            self.pages.lock().push((kind.to_string(), severity));
            Ok(())
        }
    }

    fn record() -> DeadLetterRecord {
        DeadLetterRecord::new(
            EventEnvelope::new("ledger", "PAYMENT_FAILED", "payment-events", 1, 10),
            FailureClass::RetriesExhausted,
            "timeout talking to ledger",
            "Timeout",
            5,
            Utc::now(),
            "payment-consumer",
            CriticalityTier::Critical,
        )
    }

    #[tokio::test]
    async fn test_escalation_runs_all_steps() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let pager = Arc::new(Pager { fail: false, pages: Mutex::new(Vec::new()) });
        let audit = Arc::new(InMemoryAuditLog::default());
        let handler = DeadLetterHandler::new(store.clone(), pager.clone(), audit.clone());

        let report = handler.escalate(&record()).await;
        assert!(report.is_complete());
        assert_eq!(store.count_by_status(DeadLetterStatus::RequiresManualIntervention), 1);
        assert_eq!(pager.pages.lock()[0], ("DEAD_LETTER".to_string(), Severity::Critical));
        assert_eq!(audit.count(AuditKind::DeadLetter), 1);
        assert_eq!(handler.escalated_total(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_skip_audit() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let pager = Arc::new(Pager { fail: true, pages: Mutex::new(Vec::new()) });
        let audit = Arc::new(InMemoryAuditLog::default());
        let handler = DeadLetterHandler::new(store, pager, audit.clone());

        let report = handler.escalate(&record()).await;
        assert!(report.stored);
        assert!(!report.notified);
        assert!(report.audited);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(audit.count(AuditKind::DeadLetter), 1);
    }
}
