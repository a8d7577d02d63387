pub mod event;
pub mod service;

pub use event::DashboardEvent;
pub use service::{Orchestrator, OrchestratorConfig};
