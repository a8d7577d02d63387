use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use pipeline_core::{CurrentStage, PipelineState};
use serde::{Deserialize, Serialize};

use crate::error::{not_found, ApiResult};
use crate::state::AppState;

/// `GET /status/{request_id}` — a proxied read of the orchestrator's view,
/// never the broker directly.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<PipelineState>> {
    state
        .orchestrator
        .state(&request_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown request_id '{request_id}'")))
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestsResponse {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub items: Vec<PipelineState>,
}

fn stage_label(stage: CurrentStage) -> &'static str {
    match stage {
        CurrentStage::Submitted => "submitted",
        CurrentStage::Analysis => "analysis",
        CurrentStage::Planning => "planning",
        CurrentStage::Blueprint => "blueprint",
        CurrentStage::Code => "code",
        CurrentStage::Test => "test",
        CurrentStage::Completed => "completed",
        CurrentStage::Failed => "failed",
        CurrentStage::Cancelled => "cancelled",
    }
}

/// `GET /requests` — paginated, newest-activity-first, optionally filtered
/// by current status. There is no per-request priority to filter on: that
/// field lives on individual `Task`s, not on `PipelineState`.
pub async fn requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RequestsQuery>,
) -> ApiResult<Json<RequestsResponse>> {
    let limit = query.limit.clamp(1, MAX_LIMIT);
    let page = query.page.max(1);

    let mut items = state.orchestrator.list().await;
    if let Some(filter) = &query.status {
        items.retain(|s| stage_label(s.current_stage) == filter.as_str());
    }
    items.sort_by(|a, b| b.last_event_at.cmp(&a.last_event_at));

    let total = items.len();
    let start = (page - 1) * limit;
    let page_items = items.into_iter().skip(start).take(limit).collect();

    Ok(Json(RequestsResponse {
        page,
        limit,
        total,
        items: page_items,
    }))
}
