//! Shared plumbing every stage transform uses to call the generator and
//! turn its response into a typed value.

use std::sync::Arc;

use pipeline_core::PipelineError;
use pipeline_generator::{GenerationRequest, GeneratorClient, GeneratorError};

pub async fn call_generator<T: serde::de::DeserializeOwned>(
    generator: &Arc<dyn GeneratorClient>,
    stage: &str,
    input: serde_json::Value,
) -> Result<T, PipelineError> {
    let request = GenerationRequest {
        stage: stage.to_string(),
        input,
    };
    let response = generator.generate(request).await.map_err(map_generator_error)?;
    serde_json::from_value(response.output)
        .map_err(|e| PipelineError::Permanent(format!("generator response malformed: {e}")))
}

fn map_generator_error(err: GeneratorError) -> PipelineError {
    match err {
        GeneratorError::Timeout => PipelineError::Transient("generator call timed out".into()),
        GeneratorError::Transient(msg) => PipelineError::Transient(msg),
        GeneratorError::Permanent(msg) => PipelineError::Permanent(msg),
        GeneratorError::Http(e) => PipelineError::Transient(e.to_string()),
    }
}
