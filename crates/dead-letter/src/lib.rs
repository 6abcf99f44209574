//! Dead-Letter Layer
//!
//! Terminal destination for events that exhausted automated recovery:
//! - Dead-letter record and DLQ wire message
//! - Sink port with in-memory and MQTT implementations
//! - Audit trail port
//! - Escalation of dead-lettered events to manual intervention

mod audit;
mod handler;
mod mqtt;
mod record;
mod store;

pub use audit::{AuditContext, AuditEntry, AuditKind, AuditService, InMemoryAuditLog};
pub use handler::{DeadLetterHandler, EscalationReport};
pub use mqtt::{MqttDeadLetterSink, MqttSinkConfig};
pub use record::{DeadLetterMessage, DeadLetterRecord, DeadLetterStatus, DEFAULT_DLQ_SUFFIX};
pub use store::InMemoryDeadLetterStore;

use async_trait::async_trait;
use thiserror::Error;

/// Dead-letter errors
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Audit write failed: {0}")]
    Audit(String),
}

/// Destination for dead-lettered events
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;
}
