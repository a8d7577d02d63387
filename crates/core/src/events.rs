use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Published to `orchestration.failures` when a stage transform fails
/// non-retryably, or exhausts its retry budget after repeated transient
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub request_id: String,
    pub stage: Stage,
    pub error: String,
}

/// Administrative events published to `orchestration.events`. Cancellation
/// is the only one today; the gateway's `DELETE /cancel/{request_id}`
/// publishes one of these rather than mutating orchestrator state directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlEvent {
    Cancel { request_id: String },
}
