use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{AnalysisPayload, PipelineError, PlanningPayload, Stage, StageEnvelope, Transform, TransformOutcome};
use pipeline_generator::GeneratorClient;
use serde::Deserialize;

use crate::graph::topological_levels;
use crate::support::call_generator;

#[derive(Debug, Deserialize, Default)]
struct Generated {
    #[serde(default)]
    risks: Vec<String>,
}

/// Orders tasks topologically (ties by ascending priority, then insertion
/// order), groups parallelizable tasks by level, and annotates risks. A
/// zero-dependency task set is a pass-through single-group ordering.
pub struct PlanningTransform {
    generator: Arc<dyn GeneratorClient>,
}

impl PlanningTransform {
    pub fn new(generator: Arc<dyn GeneratorClient>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Transform for PlanningTransform {
    fn stage(&self) -> Stage {
        Stage::Planning
    }

    async fn apply(
        &self,
        envelope: &StageEnvelope,
        worker_id: &str,
    ) -> Result<TransformOutcome, PipelineError> {
        let analysis: AnalysisPayload = envelope.decode_payload()?;
        let levels = topological_levels(&analysis.tasks)?;

        let mut dependencies = HashMap::new();
        for task in &analysis.tasks {
            dependencies.insert(task.id.clone(), task.dependencies.clone());
        }

        let generated: Generated = if analysis.tasks.is_empty() {
            Generated::default()
        } else {
            call_generator(
                &self.generator,
                "planning",
                serde_json::json!({ "tasks": analysis.tasks, "ordered_tasks": levels.ordered }),
            )
            .await?
        };

        let payload = PlanningPayload {
            analysis,
            ordered_tasks: levels.ordered,
            dependencies,
            parallel_groups: levels.groups,
            timeline: Vec::new(),
            risks: generated.risks,
        };

        let next = envelope.advance(Stage::Blueprint, worker_id, &payload)?;
        Ok(TransformOutcome::Publish(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::{Task, TaskStatus};
    use pipeline_generator::{GenerationRequest, GenerationResponse, GeneratorError};

    struct StubGenerator;

    #[async_trait]
    impl GeneratorClient for StubGenerator {
        async fn generate(&self, _req: GenerationRequest) -> Result<GenerationResponse, GeneratorError> {
            Ok(GenerationResponse {
                output: serde_json::json!({ "risks": ["vendor API instability"] }),
            })
        }
    }

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: id.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority: 3,
            status: TaskStatus::Pending,
        }
    }

    #[tokio::test]
    async fn orders_tasks_and_advances_to_blueprint() {
        let analysis = AnalysisPayload {
            tasks: vec![task("a", &[]), task("b", &["a"])],
            intent: "demo".into(),
            constraints: vec![],
            extra: Default::default(),
        };
        let envelope = StageEnvelope::new("req-1", Stage::Planning, &analysis).unwrap();
        let transform = PlanningTransform::new(Arc::new(StubGenerator));

        let outcome = transform.apply(&envelope, "planning-worker-1").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                assert_eq!(next.stage, Stage::Blueprint);
                let payload: PlanningPayload = next.decode_payload().unwrap();
                assert_eq!(payload.ordered_tasks, vec!["a", "b"]);
                assert_eq!(payload.parallel_groups.len(), 2);
                assert_eq!(payload.risks, vec!["vendor API instability"]);
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }

    #[tokio::test]
    async fn zero_dependency_set_is_a_pass_through_single_group() {
        let analysis = AnalysisPayload {
            tasks: vec![task("a", &[]), task("b", &[]), task("c", &[])],
            intent: "demo".into(),
            constraints: vec![],
            extra: Default::default(),
        };
        let envelope = StageEnvelope::new("req-1", Stage::Planning, &analysis).unwrap();
        let transform = PlanningTransform::new(Arc::new(StubGenerator));

        let outcome = transform.apply(&envelope, "w").await.unwrap();
        match outcome {
            TransformOutcome::Publish(next) => {
                let payload: PlanningPayload = next.decode_payload().unwrap();
                assert_eq!(payload.parallel_groups.len(), 1);
                assert_eq!(payload.parallel_groups[0].len(), 3);
            }
            TransformOutcome::Skip => panic!("expected a publish"),
        }
    }
}
