//! Event ingest

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use event_model::EventEnvelope;
use router::{AckHandle, RouteOutcome};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::ApiError;
use crate::AppState;

/// Topic recorded on envelopes ingested over HTTP
pub const HTTP_SOURCE_TOPIC: &str = "http-ingest";

/// One inbound event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub event_id: Option<String>,
    pub subject_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub source_topic: Option<String>,
    pub partition: Option<i32>,
    /// Assigned from the ingest sequence when absent
    pub offset: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl EventRequest {
    fn into_envelope(self, next_offset: impl FnOnce() -> i64) -> Result<EventEnvelope, ApiError> {
        if self.subject_id.trim().is_empty() {
            return Err(ApiError::BadRequest("subjectId must not be empty".into()));
        }
        if self.event_type.trim().is_empty() {
            return Err(ApiError::BadRequest("eventType must not be empty".into()));
        }

        let mut envelope = EventEnvelope::new(
            self.subject_id,
            self.event_type,
            self.source_topic.unwrap_or_else(|| HTTP_SOURCE_TOPIC.to_string()),
            self.partition.unwrap_or(0),
            self.offset.unwrap_or_else(next_offset),
        )
        .with_payload(self.payload);
        if let Some(event_id) = self.event_id {
            envelope = envelope.with_event_id(event_id);
        }
        if let Some(occurred_at) = self.occurred_at {
            envelope = envelope.with_occurred_at(occurred_at);
        }
        if let Some(correlation_id) = self.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        Ok(envelope)
    }
}

/// Route one event. Dead-lettered events answer `202 Accepted`.
///
/// Routing runs on its own task so a client hanging up mid-request still
/// leaves the event processed or dead-lettered.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EventRequest>,
) -> Result<(StatusCode, Json<RouteOutcome>), ApiError> {
    let envelope = request.into_envelope(|| state.next_offset())?;
    let ack = AckHandle::noop(envelope.coordinates());
    let outcome = state.router.route_detached(envelope, ack).await?;

    let status = match outcome {
        RouteOutcome::Failed(_) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}
