//! Prometheus series shared by the stage workers, the orchestrator, and the
//! gateway. Each component owns its own [`prometheus::Registry`] rather than
//! sharing a process-wide default so that unit tests can construct isolated
//! instances without colliding on metric names.

pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod stage;

pub use error::TelemetryError;
pub use gateway::GatewayMetrics;
pub use orchestrator::OrchestratorMetrics;
pub use stage::StageMetrics;

/// Renders every metric family registered on `registry` as Prometheus text
/// exposition format, the body served by each component's `/metrics` route.
pub fn render(registry: &prometheus::Registry) -> Result<String, TelemetryError> {
    let encoder = prometheus::TextEncoder::new();
    let families = registry.gather();
    Ok(encoder.encode_to_string(&families)?)
}
