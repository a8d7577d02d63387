use thiserror::Error;

/// Errors surfaced by the broker adapter and the worker runtime built on it.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("delivery {0} not found or already resolved")]
    UnknownDelivery(u64),

    #[error(transparent)]
    Pipeline(#[from] pipeline_core::PipelineError),
}
