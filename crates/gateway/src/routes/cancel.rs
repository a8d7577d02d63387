use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use pipeline_core::ControlEvent;
use serde::Serialize;

use crate::error::{internal_error, service_unavailable, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub request_id: String,
    pub status: &'static str,
}

/// `DELETE /cancel/{request_id}` — emits a cancellation event; the
/// orchestrator is the only component that enforces terminality on it.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let event = ControlEvent::Cancel {
        request_id: request_id.clone(),
    };
    let body = serde_json::to_vec(&event).map_err(internal_error)?;
    state
        .broker
        .publish(pipeline_core::topics::ORCHESTRATION_EVENTS, &request_id, body)
        .await
        .map_err(|_| service_unavailable("broker unavailable"))?;

    Ok(Json(CancelResponse {
        request_id,
        status: "cancellation_requested",
    }))
}
