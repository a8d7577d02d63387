use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use pipeline_core::{generate_request_id, AnalysisPayload, Stage, StageEnvelope, Submission};
use serde::Serialize;
use tracing::{error, info};

use crate::error::{bad_request, internal_error, service_unavailable, ApiResult};
use crate::ingest::{self, IngestLimits};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub request_id: String,
    pub status: &'static str,
}

async fn publish_submission(state: &AppState, submission: Submission) -> ApiResult<SubmitResponse> {
    let request_id = generate_request_id();
    let payload = AnalysisPayload::from_submission(&submission).map_err(internal_error)?;
    let envelope = StageEnvelope::new(&request_id, Stage::Analysis, &payload).map_err(internal_error)?;
    let body = envelope.to_json_bytes().map_err(internal_error)?;

    state
        .broker
        .publish(Stage::Analysis.input_topic(), &request_id, body)
        .await
        .map_err(|e| {
            error!(error = %e, request_id = %request_id, "failed to publish initial envelope");
            service_unavailable("broker unavailable")
        })?;

    info!(request_id = %request_id, "submission accepted");
    Ok(SubmitResponse { request_id, status: "submitted" })
}

/// `POST /submit` — a plain JSON submission, almost always `NewProject`.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<Submission>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let response = publish_submission(&state, submission).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `POST /submit_with_files` — multipart form with a `submission` JSON part
/// and, for archive uploads, an `archive` binary part. A git submission
/// ingests by cloning; an archive submission ingests by unzipping; either
/// way the envelope that gets published carries the resolved
/// `Submission::ExistingArchive` tree, not the caller's original reference.
pub async fn submit_with_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut submission: Option<Submission> = None;
    let mut archive_bytes: Option<Vec<u8>> = None;
    let mut total_bytes: u64 = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("multipart error: {e}")))?
    {
        match field.name().unwrap_or("").to_string().as_str() {
            "submission" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("bad submission part: {e}")))?;
                total_bytes += text.len() as u64;
                submission = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| bad_request(format!("invalid submission json: {e}")))?,
                );
            }
            "archive" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("bad archive part: {e}")))?;
                total_bytes += bytes.len() as u64;
                archive_bytes = Some(bytes.to_vec());
            }
            other => return Err(bad_request(format!("unexpected multipart field '{other}'"))),
        }
    }

    let submission = submission.ok_or_else(|| bad_request("missing 'submission' part"))?;
    let limits = IngestLimits::from_section(&state.config, Vec::new());

    let resolved = match (&submission, archive_bytes) {
        (Submission::ExistingGit { url, branch, .. }, _) => {
            let tree = ingest::clone_git(url, branch, &limits).await?;
            Submission::ExistingArchive { tree }
        }
        (_, Some(bytes)) => {
            let tree = ingest::extract_archive(&bytes, &limits)?;
            Submission::ExistingArchive { tree }
        }
        (Submission::NewProject { .. }, None) | (Submission::ExistingArchive { .. }, None) => submission,
    };

    state.metrics.record_ingress_bytes(total_bytes);
    let response = publish_submission(&state, resolved).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
