use async_trait::async_trait;

use crate::envelope::StageEnvelope;
use crate::error::PipelineError;
use crate::stage::Stage;

/// What a stage transform produced for one envelope.
pub enum TransformOutcome {
    /// Publish the already-advanced envelope downstream.
    Publish(StageEnvelope),
    /// Nothing to publish (e.g. a cancelled request observed mid-flight).
    Skip,
}

/// The per-stage business logic the worker runtime drives. Implementors
/// turn one stage's envelope into the next stage's envelope; validation and
/// classification of failures as retryable or not is the transform's job,
/// the runtime only acts on [`PipelineError::kind`].
#[async_trait]
pub trait Transform: Send + Sync {
    fn stage(&self) -> Stage;

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError>;
}
