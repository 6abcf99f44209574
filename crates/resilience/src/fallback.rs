//! Fallback path for events that cannot be processed

use alerting::{AlertingService, NotificationContext, Severity};
use chrono::{DateTime, Utc};
use dead_letter::{
    AuditContext, AuditService, DeadLetterHandler, DeadLetterRecord, DeadLetterSink,
    EscalationReport,
};
use event_model::{CriticalityTier, EventEnvelope, FailureClass, IdempotencyKey};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

/// Why the envelope ended up in the fallback path
#[derive(Debug, Clone, PartialEq)]
pub struct FailureContext {
    pub failure_class: FailureClass,
    pub reason: String,
    /// Variant of the last error, e.g. `Transient` or `CircuitOpen`
    pub error_class: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub tier: CriticalityTier,
    pub must_notify: bool,
}

/// What the fallback path managed to do. Sub-step failures are collected
/// here instead of being propagated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackReport {
    pub failure_class: FailureClass,
    pub reason: String,
    pub attempts: u32,
    pub record_id: String,
    pub dead_lettered: bool,
    pub audited: bool,
    /// `None` when the tier does not page
    pub notified: Option<bool>,
    /// `None` when no escalation handler is attached or the publish failed
    #[serde(skip)]
    pub escalation: Option<EscalationReport>,
    pub errors: Vec<String>,
}

/// Dead-letter, audit and out-of-band notification for failed envelopes
pub struct FallbackPath {
    consumer_name: String,
    sink: Arc<dyn DeadLetterSink>,
    audit: Arc<dyn AuditService>,
    alerting: Arc<dyn AlertingService>,
    escalation: Option<Arc<DeadLetterHandler>>,
}

impl FallbackPath {
    pub fn new(
        consumer_name: impl Into<String>,
        sink: Arc<dyn DeadLetterSink>,
        audit: Arc<dyn AuditService>,
        alerting: Arc<dyn AlertingService>,
    ) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            sink,
            audit,
            alerting,
            escalation: None,
        }
    }

    /// Escalate every successfully dead-lettered record through `handler`
    #[must_use]
    pub fn with_escalation(mut self, handler: Arc<DeadLetterHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Always runs every step; the envelope reaches a terminal outcome
    /// whatever the collaborators do.
    pub async fn run(&self, envelope: &EventEnvelope, failure: FailureContext) -> FallbackReport {
        let record = DeadLetterRecord::new(
            envelope.clone(),
            failure.failure_class,
            failure.reason.clone(),
            failure.error_class.clone(),
            failure.attempts,
            failure.first_failed_at,
            self.consumer_name.clone(),
            failure.tier,
        );
        let mut report = FallbackReport {
            failure_class: failure.failure_class,
            reason: failure.reason.clone(),
            attempts: failure.attempts,
            record_id: record.id.clone(),
            dead_lettered: false,
            audited: false,
            notified: None,
            escalation: None,
            errors: Vec::new(),
        };

        error!(
            key = %record.idempotency_key,
            at = %envelope.coordinates(),
            class = %failure.failure_class,
            attempts = failure.attempts,
            reason = %failure.reason,
            "Event processing failed, running fallback"
        );

        match self.sink.publish(&record).await {
            Ok(()) => report.dead_lettered = true,
            Err(e) => {
                error!(id = %record.id, error = %e, "Failed to publish dead-letter record");
                report.errors.push(format!("dead-letter: {e}"));
            }
        }

        let event_id = IdempotencyKey::derive(envelope);
        let context = self.audit_context(envelope, &failure);
        match self
            .audit
            .record_failure(
                event_id.as_str(),
                envelope.source_topic(),
                &format!("{}: {}", failure.failure_class, failure.reason),
                envelope.correlation_id(),
                &context,
            )
            .await
        {
            Ok(()) => report.audited = true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Failed to write failure audit entry");
                report.errors.push(format!("audit: {e}"));
            }
        }

        if failure.must_notify {
            let message = format!(
                "{} event for {} could not be processed ({}): {}",
                envelope.event_type(),
                envelope.subject_id(),
                failure.failure_class,
                failure.reason
            );
            let mut notify_context: NotificationContext = context.clone();
            notify_context.insert("deadLettered".into(), report.dead_lettered.to_string());
            match self
                .alerting
                .notify("EVENT_PROCESSING_FAILED", Severity::Critical, &message, &notify_context)
                .await
            {
                Ok(()) => report.notified = Some(true),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Fallback notification failed");
                    report.notified = Some(false);
                    report.errors.push(format!("notify: {e}"));
                }
            }
        }

        if report.dead_lettered {
            if let Some(handler) = &self.escalation {
                report.escalation = Some(handler.escalate(&record).await);
            }
        }

        report
    }

    fn audit_context(&self, envelope: &EventEnvelope, failure: &FailureContext) -> AuditContext {
        let mut context = AuditContext::new();
        context.insert("consumerName".into(), self.consumer_name.clone());
        context.insert("subjectId".into(), envelope.subject_id().to_string());
        context.insert("eventType".into(), envelope.event_type().to_string());
        context.insert("failureClass".into(), failure.failure_class.to_string());
        context.insert("errorClass".into(), failure.error_class.clone());
        context.insert("attempts".into(), failure.attempts.to_string());
        context.insert("tier".into(), failure.tier.to_string());
        context.insert("coordinates".into(), envelope.coordinates());
        context
    }
}
