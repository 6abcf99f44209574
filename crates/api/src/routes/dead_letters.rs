//! Dead-letter inspection

use axum::extract::{Query, State};
use axum::Json;
use dead_letter::{DeadLetterRecord, DeadLetterStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::default_limit;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    /// `QUEUED` or `REQUIRES_MANUAL_INTERVENTION`
    pub status: Option<DeadLetterStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub data: Vec<DeadLetterRecord>,
    pub count: usize,
    pub total: usize,
    pub requires_intervention: usize,
    /// Records lost to retention before an operator saw them
    pub unreviewed_evictions: u64,
}

/// Stored records, newest first
pub async fn get_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLetterQuery>,
) -> Json<DeadLetterResponse> {
    let store = state.router.dead_letters();
    let data = store.list(params.status, params.limit);
    Json(DeadLetterResponse {
        count: data.len(),
        total: store.len(),
        requires_intervention: store.count_by_status(DeadLetterStatus::RequiresManualIntervention),
        unreviewed_evictions: store.unreviewed_evictions(),
        data,
    })
}
