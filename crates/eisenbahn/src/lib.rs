pub mod broker;
pub mod error;
pub mod stage_runtime;
pub mod traits;
pub mod worker;

pub use broker::InProcessBroker;
pub use error::FabricError;
pub use stage_runtime::{StageRuntime, StageRuntimeConfig};
pub use traits::{BrokerAdapter, Delivery, DeliveryTag};
pub use worker::{Worker, WorkerBuilder, WorkerRunner, WorkerRunnerConfig};
