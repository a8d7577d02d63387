use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{BlueprintPayload, CodePayload, PipelineError, Stage, StageEnvelope, Transform, TransformOutcome};
use pipeline_generator::GeneratorClient;
use serde::Deserialize;

use crate::support::call_generator;

#[derive(Debug, Deserialize, Default)]
struct Generated {
    #[serde(default)]
    files: HashMap<String, String>,
    #[serde(default)]
    repo_hint: String,
}

/// Produces source files consistent with the blueprint. Every file path a
/// component references must appear as a key in the produced file map.
pub struct CodeTransform {
    generator: Arc<dyn GeneratorClient>,
}

impl CodeTransform {
    pub fn new(generator: Arc<dyn GeneratorClient>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Transform for CodeTransform {
    fn stage(&self) -> Stage {
        Stage::Code
    }

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError> {
        let blueprint: BlueprintPayload = envelope.decode_payload()?;

        let generated: Generated = call_generator(
            &self.generator,
            "code",
            serde_json::json!({
                "components": blueprint.components,
                "data_model": blueprint.data_model,
                "api_spec": blueprint.api_spec,
            }),
        )
        .await?;

        for component in &blueprint.components {
            for path in &component.files {
                if !generated.files.contains_key(path) {
                    return Err(PipelineError::Permanent(format!(
                        "component '{}' references file '{}' missing from generated files",
                        component.name, path
                    )));
                }
            }
        }

        let payload = CodePayload {
            blueprint,
            files: generated.files,
            repo_hint: generated.repo_hint,
        };

        let next = envelope.advance(Stage::Test, worker_id, &payload)?;
        Ok(TransformOutcome::Publish(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::Component;
    use pipeline_generator::{GenerationRequest, GenerationResponse, GeneratorError};

    struct StubGenerator;

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
            Ok(GenerationResponse {
                output: serde_json::json!({
                    "files": {"src/main.rs": "fn main() {}"},
                    "repo_hint": "todo-app"
                }),
            })
        }
    }

    fn blueprint_with(files: Vec<&str>) -> BlueprintPayload {
        BlueprintPayload {
            components: vec![Component {
                name: "api".into(),
                kind: "service".into(),
                description: "".into(),
                files: files.into_iter().map(|s| s.to_string()).collect(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn produces_files_and_advances_to_test() {
        let blueprint = blueprint_with(vec!["src/main.rs"]);
        let envelope = StageEnvelope::new("req-1", Stage::Code, &blueprint).unwrap();
        let transform = CodeTransform::new(Arc::new(StubGenerator));

        let outcome = transform.apply(&envelope, "code-worker-1").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                assert_eq!(next.stage, Stage::Test);
                let payload: CodePayload = next.decode_payload().unwrap();
                assert!(payload.files.contains_key("src/main.rs"));
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }

    #[tokio::test]
    async fn missing_referenced_file_fails_non_retryably() {
        let blueprint = blueprint_with(vec!["src/missing.rs"]);
        let envelope = StageEnvelope::new("req-1", Stage::Code, &blueprint).unwrap();
        let transform = CodeTransform::new(Arc::new(StubGenerator));

        let err = transform.apply(&envelope, "w").await.unwrap_err();
        assert!(!err.kind().retryable());
    }
}
