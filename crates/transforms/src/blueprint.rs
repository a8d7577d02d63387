use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{BlueprintPayload, Component, PipelineError, PlanningPayload, Stage, StageEnvelope, Transform, TransformOutcome};
use pipeline_generator::GeneratorClient;
use serde::Deserialize;

use crate::support::call_generator;

#[derive(Debug, Deserialize, Default)]
struct Generated {
    #[serde(default)]
    components: Vec<Component>,
    #[serde(default)]
    data_model: serde_json::Value,
    #[serde(default)]
    api_spec: serde_json::Value,
    #[serde(default)]
    deployment_plan: serde_json::Value,
}

/// Produces architectural components, a data model, an API spec, and a
/// deployment plan. Purely structural — no external writes.
pub struct BlueprintTransform {
    generator: Arc<dyn GeneratorClient>,
}

impl BlueprintTransform {
    pub fn new(generator: Arc<dyn GeneratorClient>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Transform for BlueprintTransform {
    fn stage(&self) -> Stage {
        Stage::Blueprint
    }

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError> {
        let planning: PlanningPayload = envelope.decode_payload()?;

        let generated: Generated = call_generator(
            &self.generator,
            "blueprint",
            serde_json::json!({
                "tasks": planning.analysis.tasks,
                "ordered_tasks": planning.ordered_tasks,
                "parallel_groups": planning.parallel_groups,
            }),
        )
        .await?;

        let payload = BlueprintPayload {
            planning,
            components: generated.components,
            data_model: generated.data_model,
            api_spec: generated.api_spec,
            deployment_plan: generated.deployment_plan,
        };

        let next = envelope.advance(Stage::Code, worker_id, &payload)?;
        Ok(TransformOutcome::Publish(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_generator::{GenerationRequest, GenerationResponse, GeneratorError};

    struct StubGenerator;

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
            Ok(GenerationResponse {
                output: serde_json::json!({
                    "components": [
                        {"name": "api", "kind": "service", "description": "HTTP surface", "files": ["src/main.rs"]}
                    ],
                    "data_model": {"entities": ["Todo"]},
                    "api_spec": {"routes": ["/todos"]},
                    "deployment_plan": {"target": "container"}
                }),
            })
        }
    }

    #[tokio::test]
    async fn produces_components_and_advances_to_code() {
        let planning = PlanningPayload::default();
        let envelope = StageEnvelope::new("req-1", Stage::Blueprint, &planning).unwrap();
        let transform = BlueprintTransform::new(Arc::new(StubGenerator));

        let outcome = transform.apply(&envelope, "blueprint-worker-1").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                assert_eq!(next.stage, Stage::Code);
                let payload: BlueprintPayload = next.decode_payload().unwrap();
                assert_eq!(payload.components.len(), 1);
                assert_eq!(payload.components[0].files, vec!["src/main.rs"]);
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }
}
