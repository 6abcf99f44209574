//! Domain handler port and registration

use async_trait::async_trait;
use event_model::{CriticalityTier, EventEnvelope, HandlerError};
use serde::Serialize;
use std::sync::Arc;

/// Numeric result forwarded to the alert tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricObservation {
    /// Defaults to the envelope's subject
    pub subject_id: Option<String>,
    pub metric_kind: String,
    pub value: f64,
    pub threshold: f64,
}

impl MetricObservation {
    pub fn new(metric_kind: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            subject_id: None,
            metric_kind: metric_kind.into(),
            value,
            threshold,
        }
    }

    #[must_use]
    pub fn for_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

/// Successful handler result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HandlerOutput {
    pub observation: Option<MetricObservation>,
}

impl HandlerOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn observed(observation: MetricObservation) -> Self {
        Self {
            observation: Some(observation),
        }
    }
}

/// Business logic for one event type. The router owns dedup, retry,
/// dead-lettering and acknowledgment around it.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerOutput, HandlerError>;
}

/// Handler plus how hard to try and which circuit protects it
#[derive(Clone)]
pub struct HandlerRegistration {
    pub handler: Arc<dyn DomainHandler>,
    pub tier: CriticalityTier,
    /// Handlers sharing an operation class share a circuit breaker
    pub operation_class: String,
}

impl HandlerRegistration {
    pub fn new(handler: Arc<dyn DomainHandler>, operation_class: impl Into<String>) -> Self {
        Self {
            handler,
            tier: CriticalityTier::default(),
            operation_class: operation_class.into(),
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: CriticalityTier) -> Self {
        self.tier = tier;
        self
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("tier", &self.tier)
            .field("operation_class", &self.operation_class)
            .finish()
    }
}

/// Gauge-style handler: reads one numeric payload field and reports it
/// against a threshold (payload override or fixed default).
#[derive(Debug, Clone)]
pub struct MetricEventHandler {
    metric_kind: String,
    value_field: String,
    threshold_field: Option<String>,
    default_threshold: f64,
    range: Option<(f64, f64)>,
}

impl MetricEventHandler {
    pub fn new(metric_kind: impl Into<String>, value_field: impl Into<String>, default_threshold: f64) -> Self {
        Self {
            metric_kind: metric_kind.into(),
            value_field: value_field.into(),
            threshold_field: None,
            default_threshold,
            range: None,
        }
    }

    #[must_use]
    pub fn with_threshold_field(mut self, field: impl Into<String>) -> Self {
        self.threshold_field = Some(field.into());
        self
    }

    /// Values outside `[min, max]` fail validation
    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn metric_kind(&self) -> &str {
        &self.metric_kind
    }
}

#[async_trait]
impl DomainHandler for MetricEventHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerOutput, HandlerError> {
        let reader = envelope.reader();
        let value = match self.range {
            Some(range) => reader.require_f64_in_range(&self.value_field, range)?,
            None => reader.require_f64(&self.value_field)?,
        };
        let threshold = match &self.threshold_field {
            Some(field) => reader.optional_f64(field)?.unwrap_or(self.default_threshold),
            None => self.default_threshold,
        };
        Ok(HandlerOutput::observed(MetricObservation::new(
            self.metric_kind.clone(),
            value,
            threshold,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_model::ValidationError;
    use serde_json::json;

    fn envelope(payload: serde_json::Value) -> EventEnvelope {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        EventEnvelope::new("db-1", "CPU_USAGE", "capacity-events", 0, 1).with_payload(payload)
    }

    #[tokio::test]
    async fn test_metric_handler_reads_value_and_threshold() {
        let handler = MetricEventHandler::new("cpu_utilization", "cpuUsage", 80.0)
            .with_threshold_field("threshold")
            .with_range(0.0, 100.0);

        let output = handler
            .handle(&envelope(json!({"cpuUsage": 91.5, "threshold": 85})))
            .await
            .unwrap();
        assert_eq!(
            output.observation,
            Some(MetricObservation::new("cpu_utilization", 91.5, 85.0))
        );

        let output = handler.handle(&envelope(json!({"cpuUsage": "42"}))).await.unwrap();
        assert_eq!(output.observation.map(|o| o.threshold), Some(80.0));
    }

    #[tokio::test]
    async fn test_metric_handler_validation_is_permanent() {
        let handler = MetricEventHandler::new("cpu_utilization", "cpuUsage", 80.0).with_range(0.0, 100.0);

        let missing = handler.handle(&envelope(json!({}))).await.unwrap_err();
        assert!(matches!(missing, HandlerError::Permanent(ValidationError::MissingField(_))));
        assert!(!missing.is_retryable());

        let out_of_range = handler.handle(&envelope(json!({"cpuUsage": 140.0}))).await.unwrap_err();
        assert!(matches!(out_of_range, HandlerError::Permanent(ValidationError::OutOfRange { .. })));
    }
}
