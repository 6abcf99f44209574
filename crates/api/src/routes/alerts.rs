//! Alert Routes

use alerting::{AlertState, Transition};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{default_limit, ApiError};
use crate::AppState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// Filter by severity, e.g. `HIGH`
    pub severity: Option<String>,
    /// Filter by acknowledged status
    pub acknowledged: Option<bool>,
    /// Include quiet states
    #[serde(default)]
    pub include_inactive: bool,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub data: Vec<AlertState>,
    pub count: usize,
    pub unacknowledged_count: usize,
}

/// List alert states, most severe first
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> Json<AlertResponse> {
    let tracker = state.router.tracker();
    let mut alerts = if params.include_inactive {
        let mut all = tracker.snapshot();
        all.sort_by(|a, b| b.severity.cmp(&a.severity));
        all
    } else {
        tracker.active()
    };

    if let Some(severity) = &params.severity {
        alerts.retain(|a| a.severity.as_str().eq_ignore_ascii_case(severity));
    }
    if let Some(acknowledged) = params.acknowledged {
        alerts.retain(|a| a.acknowledged == acknowledged);
    }
    alerts.truncate(params.limit);

    let unacknowledged_count = alerts.iter().filter(|a| a.is_active() && !a.acknowledged).count();
    Json(AlertResponse {
        count: alerts.len(),
        unacknowledged_count,
        data: alerts,
    })
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path((subject_id, metric_kind)): Path<(String, String)>,
) -> Result<Json<Transition>, ApiError> {
    state
        .router
        .acknowledge_alert(&subject_id, &metric_kind)
        .map(Json)
        .ok_or_else(|| not_active(&subject_id, &metric_kind))
}

pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    Path((subject_id, metric_kind)): Path<(String, String)>,
) -> Result<Json<Transition>, ApiError> {
    state
        .router
        .resolve_alert(&subject_id, &metric_kind)
        .map(Json)
        .ok_or_else(|| not_active(&subject_id, &metric_kind))
}

fn not_active(subject_id: &str, metric_kind: &str) -> ApiError {
    ApiError::NotFound(format!("no open alert for {subject_id}/{metric_kind}"))
}
