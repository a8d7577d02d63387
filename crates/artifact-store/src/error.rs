use thiserror::Error;

/// Errors from the artifact store adapter.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact write retries exhausted: {0}")]
    Exhausted(String),
}
