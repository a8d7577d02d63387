//! The orchestrator's own output: a stream of events the dashboard fan-out
//! (C8) subscribes to, independent of the broker traffic that drives it.

use chrono::{DateTime, Utc};
use pipeline_core::{CurrentStage, PipelineState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// A state transition as it's observed, per the orchestrator's state
    /// machine. `stage_payload_summary` is the bounded projection from
    /// `Payload::summarize`, never the full payload.
    Transition {
        request_id: String,
        from: CurrentStage,
        to: CurrentStage,
        at: DateTime<Utc>,
        stage_payload_summary: serde_json::Value,
    },
    /// Emitted when a non-terminal request's `last_event_at` exceeds the
    /// stall threshold.
    Stalled { request_id: String, at: DateTime<Utc> },
    /// Emitted the next time a stalled request makes valid progress.
    Unstalled { request_id: String, at: DateTime<Utc> },
    /// One per reconstructed request, emitted during startup recovery
    /// before live streaming resumes.
    Snapshot { state: PipelineState },
}
