use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}
