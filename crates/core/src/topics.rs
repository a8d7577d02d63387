//! Fixed broker topic names. Stage-specific topics are derived from
//! [`crate::stage::Stage`]; the rest are named here once so every component
//! agrees on the exact string.

pub const COMPLETION: &str = "tasks.completion";
pub const ORCHESTRATION_EVENTS: &str = "orchestration.events";
pub const ORCHESTRATION_FAILURES: &str = "orchestration.failures";

pub const ORCHESTRATOR_GROUP: &str = "orchestrator-group";

/// DLQ topic backing a given input topic, e.g. `dlq("tasks.analysis")`.
/// The broker adapter routes a non-requeued nack here automatically.
pub fn dlq(topic: &str) -> String {
    format!("dlq.{topic}")
}

/// Every topic the orchestrator must subscribe to in order to see all
/// pipeline traffic.
pub fn all_stage_topics() -> Vec<&'static str> {
    use crate::stage::ORDERED_STAGES;
    let mut topics: Vec<&'static str> = ORDERED_STAGES.iter().map(|s| s.input_topic()).collect();
    topics.push(COMPLETION);
    topics.push(ORCHESTRATION_FAILURES);
    topics.push(ORCHESTRATION_EVENTS);
    topics
}
