use std::sync::Arc;

use pipeline_core::config::GatewaySection;
use pipeline_fabric::BrokerAdapter;
use pipeline_orchestrator::Orchestrator;
use pipeline_telemetry::GatewayMetrics;

/// Shared state every route handler receives through axum's `State`
/// extractor. The gateway never touches `PipelineState` directly; it only
/// ever reads it back through the in-process `Orchestrator` handle.
pub struct AppState {
    pub broker: Arc<dyn BrokerAdapter>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: GatewayMetrics,
    pub config: GatewaySection,
}
