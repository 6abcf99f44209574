//! Inbound Event Envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::payload::PayloadReader;

/// One inbound unit of work derived from a broker message.
///
/// Built once on receipt with the `with_*` methods, then shared read-only
/// until it reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    subject_id: String,
    event_type: String,
    #[serde(default)]
    payload: Map<String, Value>,
    source_topic: String,
    #[serde(default)]
    partition: i32,
    #[serde(default)]
    offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl EventEnvelope {
    /// Create an envelope for a message read at `topic/partition@offset`
    pub fn new(
        subject_id: impl Into<String>,
        event_type: impl Into<String>,
        source_topic: impl Into<String>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            event_id: None,
            subject_id: subject_id.into(),
            event_type: event_type.into(),
            payload: Map::new(),
            source_topic: source_topic.into(),
            partition,
            offset,
            occurred_at: None,
            received_at: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Explicit producer-assigned event id, preferred for idempotency
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    /// The monitored resource or entity
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Typed access to payload fields
    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.payload)
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.occurred_at
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Producer timestamp if present, receipt time otherwise
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.occurred_at.unwrap_or(self.received_at)
    }

    /// Broker coordinates formatted for log lines
    pub fn coordinates(&self) -> String {
        format!("{}/{}@{}", self.source_topic, self.partition, self.offset)
    }
}
