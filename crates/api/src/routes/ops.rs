//! Circuit, window and Prometheus endpoints

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use metric_buffer::{BufferSummary, WindowSample};
use resilience::CircuitStats;
use serde::Serialize;
use std::sync::Arc;

use super::ApiError;
use crate::AppState;

pub async fn get_circuits(State(state): State<Arc<AppState>>) -> Json<Vec<CircuitStats>> {
    Json(state.router.circuits())
}

#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub subject_id: String,
    pub metric_kind: String,
    pub capacity: usize,
    pub summary: BufferSummary,
    pub samples: Vec<WindowSample>,
}

/// Recent samples and summary for one `(subject, metric)` window
pub async fn get_window(
    State(state): State<Arc<AppState>>,
    Path((subject_id, metric_kind)): Path<(String, String)>,
) -> Result<Json<WindowResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("no samples for {subject_id}/{metric_kind}"));
    let window = state
        .router
        .window_if_present(&subject_id, &metric_kind)
        .ok_or_else(not_found)?;
    let summary = window.summary().map_err(|_| not_found())?;

    Ok(Json(WindowResponse {
        capacity: window.capacity(),
        samples: window.samples(),
        summary,
        subject_id,
        metric_kind,
    }))
}

/// Prometheus text exposition
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
