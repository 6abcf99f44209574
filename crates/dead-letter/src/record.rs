//! Dead-Letter Record and DLQ Message

use chrono::{DateTime, Utc};
use event_model::{CriticalityTier, EventEnvelope, FailureClass, IdempotencyKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DeadLetterError;

/// Suffix appended to the source topic to form the dead-letter destination
pub const DEFAULT_DLQ_SUFFIX: &str = "-dlq";

/// Lifecycle of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterStatus {
    /// Written to the dead-letter destination
    Queued,
    /// Escalated; an operator must act on it
    RequiresManualIntervention,
}

/// Envelope that exhausted recovery, with its failure metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub id: String,
    pub idempotency_key: IdempotencyKey,
    pub envelope: EventEnvelope,
    pub failure_class: FailureClass,
    pub error_reason: String,
    /// Variant of the last error, e.g. `Transient` or `CircuitOpen`
    pub error_class: String,
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub consumer_name: String,
    pub tier: CriticalityTier,
    pub status: DeadLetterStatus,
}

impl DeadLetterRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        envelope: EventEnvelope,
        failure_class: FailureClass,
        error_reason: impl Into<String>,
        error_class: impl Into<String>,
        attempt_count: u32,
        first_failed_at: DateTime<Utc>,
        consumer_name: impl Into<String>,
        tier: CriticalityTier,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            idempotency_key: IdempotencyKey::derive(&envelope),
            envelope,
            failure_class,
            error_reason: error_reason.into(),
            error_class: error_class.into(),
            attempt_count,
            first_failed_at,
            last_failed_at: Utc::now(),
            consumer_name: consumer_name.into(),
            tier,
            status: DeadLetterStatus::Queued,
        }
    }

    /// Dead-letter destination for this record's source topic
    pub fn destination(&self, suffix: &str) -> String {
        format!("{}{}", self.envelope.source_topic(), suffix)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id()
    }

    pub fn to_message(&self) -> DeadLetterMessage {
        DeadLetterMessage {
            record_id: self.id.clone(),
            original_message: self.envelope.clone(),
            original_topic: self.envelope.source_topic().to_string(),
            original_partition: self.envelope.partition(),
            original_offset: self.envelope.offset(),
            error_reason: self.error_reason.clone(),
            error_class: self.error_class.clone(),
            failure_class: self.failure_class,
            attempt_count: self.attempt_count,
            first_failed_at: self.first_failed_at,
            last_failed_at: self.last_failed_at,
            correlation_id: self.envelope.correlation_id().map(str::to_string),
            consumer_name: self.consumer_name.clone(),
            tier: self.tier,
        }
    }
}

/// Wire format published to the dead-letter destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    pub record_id: String,
    pub original_message: EventEnvelope,
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub error_reason: String,
    pub error_class: String,
    pub failure_class: FailureClass,
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub consumer_name: String,
    pub tier: CriticalityTier,
}

impl DeadLetterMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DeadLetterError> {
        serde_json::to_vec(self).map_err(|e| DeadLetterError::Serialization(e.to_string()))
    }
}
