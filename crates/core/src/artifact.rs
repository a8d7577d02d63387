use serde::{Deserialize, Serialize};

/// Handle returned by the artifact store adapter. Written once per
/// successfully completed request and included in the completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub repo_url: String,
    pub branch: String,
    pub commit_hash: String,
    pub paths: Vec<String>,
}
