use std::collections::HashMap;

use async_trait::async_trait;
use pipeline_core::ArtifactRef;

use crate::error::ArtifactError;

/// Persists a request's final file set and hands back a reference to it.
/// Implementors must make `write` atomic from the caller's perspective:
/// either the branch advances to a new commit, or the call fails and
/// nothing changes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(
        &self,
        request_id: &str,
        files: &HashMap<String, String>,
    ) -> Result<ArtifactRef, ArtifactError>;
}
