//! Builds the [`StageRuntime`] for whichever stage a worker process hosts.
//! One binary target loads this crate once per stage; which `Transform` it
//! wraps is the only thing that varies.

use std::sync::Arc;
use std::time::Duration;

use pipeline_artifacts::ArtifactStore;
use pipeline_core::{PipelineConfig, Stage, Transform};
use pipeline_fabric::{BrokerAdapter, StageRuntime, StageRuntimeConfig};
use pipeline_generator::GeneratorClient;
use pipeline_transforms::{
    AnalysisTransform, BlueprintTransform, CodeTransform, PlanningTransform, TestTransform,
};

/// Picks the `Transform` for `stage` and wraps it in a [`StageRuntime`] wired
/// to `broker`. `generator` drives every transform's LLM call; `artifacts`
/// is only consulted by the code/test stages, which read and write files.
pub fn build_runtime(
    stage: Stage,
    broker: Arc<dyn BrokerAdapter>,
    generator: Arc<dyn GeneratorClient>,
    artifacts: Arc<dyn ArtifactStore>,
    config: &PipelineConfig,
) -> StageRuntime {
    let transform: Arc<dyn Transform> = match stage {
        Stage::Analysis => Arc::new(AnalysisTransform::new(generator)),
        Stage::Planning => Arc::new(PlanningTransform::new(generator)),
        Stage::Blueprint => Arc::new(BlueprintTransform::new(generator)),
        Stage::Code => Arc::new(CodeTransform::new(generator)),
        Stage::Test => Arc::new(TestTransform::new(generator, artifacts)),
    };

    let worker_id = format!("{}-worker", stage);
    let mut runtime_config = StageRuntimeConfig::for_stage(stage, worker_id);
    runtime_config.max_attempts = config.stage.max_attempts;
    runtime_config.deadline = Duration::from_secs(config.stage.deadline_seconds);

    StageRuntime::new(broker, transform, runtime_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use pipeline_artifacts::ArtifactError;
    use pipeline_core::ArtifactRef;
    use pipeline_fabric::{BrokerAdapter, Delivery, DeliveryTag, FabricError, Worker};
    use pipeline_generator::{GenerationRequest, GenerationResponse, GeneratorError};

    struct StubGenerator;

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
            Ok(GenerationResponse { output: serde_json::json!({}) })
        }
    }

    struct StubArtifactStore;

    #[async_trait]
    impl ArtifactStore for StubArtifactStore {
        async fn write(
            &self,
            _request_id: &str,
            _files: &HashMap<String, String>,
        ) -> Result<ArtifactRef, ArtifactError> {
            unimplemented!("not exercised by this test")
        }
    }

    struct StubBroker;

    #[async_trait]
    impl BrokerAdapter for StubBroker {
        async fn publish(&self, _topic: &str, _key: &str, _body: Vec<u8>) -> Result<(), FabricError> {
            Ok(())
        }

        async fn poll(&self, _topic: &str, _group: &str, _max: usize) -> Result<Vec<Delivery>, FabricError> {
            Ok(Vec::new())
        }

        async fn ack(&self, _tag: DeliveryTag) -> Result<(), FabricError> {
            Ok(())
        }

        async fn nack(&self, _tag: DeliveryTag, _requeue: bool) -> Result<(), FabricError> {
            Ok(())
        }

        async fn dlq_depth(&self, _topic: &str) -> Result<u64, FabricError> {
            Ok(0)
        }
    }

    #[test]
    fn build_runtime_picks_the_matching_transform_for_every_stage() {
        let broker: Arc<dyn BrokerAdapter> = Arc::new(StubBroker);
        let generator: Arc<dyn GeneratorClient> = Arc::new(StubGenerator);
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(StubArtifactStore);
        let config = PipelineConfig::from_env();

        for stage in pipeline_core::ORDERED_STAGES {
            let runtime = build_runtime(stage, broker.clone(), generator.clone(), artifacts.clone(), &config);
            assert!(runtime.name().ends_with("-worker"));
        }
    }
}
