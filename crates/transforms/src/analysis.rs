use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{AnalysisPayload, PipelineError, Stage, StageEnvelope, Task, Transform, TransformOutcome};
use pipeline_generator::GeneratorClient;
use serde::Deserialize;

use crate::graph::topological_levels;
use crate::support::call_generator;

#[derive(Debug, Deserialize)]
struct Generated {
    tasks: Vec<Task>,
    intent: String,
    #[serde(default)]
    constraints: Vec<String>,
}

/// Breaks a submission down into a task list. Duplicate ids or dependency
/// cycles are fatal; an empty task list is fatal (edge policy).
pub struct AnalysisTransform {
    generator: Arc<dyn GeneratorClient>,
}

impl AnalysisTransform {
    pub fn new(generator: Arc<dyn GeneratorClient>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Transform for AnalysisTransform {
    fn stage(&self) -> Stage {
        Stage::Analysis
    }

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError> {
        let incoming: AnalysisPayload = envelope.decode_payload()?;
        let submission = incoming.submission()?;

        let generated: Generated =
            call_generator(&self.generator, "analysis", serde_json::to_value(&submission)?).await?;

        if generated.tasks.is_empty() {
            return Err(PipelineError::Permanent(
                "analysis produced zero tasks for the submission".into(),
            ));
        }
        for task in &generated.tasks {
            task.validate()?;
        }
        // Validates uniqueness and dependency acyclicity; the levels
        // themselves are recomputed by planning.
        topological_levels(&generated.tasks)?;

        let payload = AnalysisPayload {
            tasks: generated.tasks,
            intent: generated.intent,
            constraints: generated.constraints,
            extra: Default::default(),
        };

        let next = envelope.advance(Stage::Planning, worker_id, &payload)?;
        Ok(TransformOutcome::Publish(next))
    }
}
