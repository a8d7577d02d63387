use std::sync::Arc;

use async_trait::async_trait;
use pipeline_artifacts::ArtifactStore;
use pipeline_core::{CodePayload, PipelineError, Stage, StageEnvelope, TestPayload, TestResults, Transform, TransformOutcome};
use pipeline_generator::GeneratorClient;
use serde::Deserialize;

use crate::support::call_generator;

#[derive(Debug, Deserialize, Default)]
struct Generated {
    #[serde(default)]
    passed: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    coverage: f32,
}

/// Runs the generated test suite (an opaque side channel here), writes the
/// final file set through the artifact store, and completes the request.
/// The only transform that performs durable I/O.
pub struct TestTransform {
    generator: Arc<dyn GeneratorClient>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl TestTransform {
    pub fn new(generator: Arc<dyn GeneratorClient>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { generator, artifacts }
    }
}

#[async_trait]
impl Transform for TestTransform {
    fn stage(&self) -> Stage {
        Stage::Test
    }

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError> {
        let code: CodePayload = envelope.decode_payload()?;

        let generated: Generated =
            call_generator(&self.generator, "test", serde_json::json!({ "files": code.files })).await?;

        let test_results = TestResults {
            passed: generated.passed,
            failed: generated.failed,
            total: generated.passed + generated.failed,
            summary: generated.summary,
        };
        let status = if generated.failed == 0 { "success" } else { "failure" };

        // The artifact store already retries internally; a failure here has
        // exhausted that budget, so it is terminal for this stage.
        let artifact_ref = self
            .artifacts
            .write(&envelope.request_id, &code.files)
            .await
            .map_err(|e| PipelineError::Permanent(e.to_string()))?;

        let payload = TestPayload {
            code,
            test_results,
            coverage: generated.coverage,
            artifact_ref: Some(artifact_ref),
            status: status.to_string(),
        };

        let next = envelope.complete(worker_id, &payload)?;
        Ok(TransformOutcome::Publish(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_artifacts::ArtifactError;
    use pipeline_core::ArtifactRef;
    use pipeline_generator::{GenerationRequest, GenerationResponse, GeneratorError};
    use std::collections::HashMap;

    struct StubGenerator {
        failed: u32,
    }

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
            Ok(GenerationResponse {
                output: serde_json::json!({
                    "passed": 10,
                    "failed": self.failed,
                    "summary": "ok",
                    "coverage": 0.82
                }),
            })
        }
    }

    struct StubArtifacts;

    #[async_trait]
    impl ArtifactStore for StubArtifacts {
        async fn write(
            &self,
            request_id: &str,
            files: &HashMap<String, String>,
        ) -> Result<ArtifactRef, ArtifactError> {
            Ok(ArtifactRef {
                repo_url: "local".into(),
                branch: format!("req/{request_id}"),
                commit_hash: "deadbeef".into(),
                paths: files.keys().cloned().collect(),
            })
        }
    }

    fn code_payload() -> CodePayload {
        let mut files = HashMap::new();
        files.insert("src/main.rs".to_string(), "fn main() {}".to_string());
        CodePayload {
            files,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn completes_with_success_status_and_artifact_ref() {
        let envelope = StageEnvelope::new("req-1", Stage::Test, &code_payload()).unwrap();
        let transform = TestTransform::new(Arc::new(StubGenerator { failed: 0 }), Arc::new(StubArtifacts));

        let outcome = transform.apply(&envelope, "test-worker-1").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                assert_eq!(next.stage, Stage::Test);
                let payload: TestPayload = next.decode_payload().unwrap();
                assert_eq!(payload.status, "success");
                assert!(payload.artifact_ref.is_some());
                assert_eq!(next.provenance.len(), 1);
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }

    #[tokio::test]
    async fn failed_tests_still_complete_with_failure_status() {
        let envelope = StageEnvelope::new("req-1", Stage::Test, &code_payload()).unwrap();
        let transform = TestTransform::new(Arc::new(StubGenerator { failed: 2 }), Arc::new(StubArtifacts));

        let outcome = transform.apply(&envelope, "w").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                let payload: TestPayload = next.decode_payload().unwrap();
                assert_eq!(payload.status, "failure");
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }
}
