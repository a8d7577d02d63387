pub mod analysis;
pub mod blueprint;
pub mod code;
pub mod graph;
pub mod planning;
pub mod support;
pub mod test;

pub use analysis::AnalysisTransform;
pub use blueprint::BlueprintTransform;
pub use code::CodeTransform;
pub use planning::PlanningTransform;
pub use test::TestTransform;
