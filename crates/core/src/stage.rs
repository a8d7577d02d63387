use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One of the five pipeline phases, each handled by its own worker.
///
/// Wire representation uses the gerund spellings ("coding"/"testing") per
/// the envelope format, while Rust code and topic helpers use the shorter
/// noun forms; [`Stage::topic`] is the single place the two meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Analysis,
    Planning,
    Blueprint,
    #[serde(rename = "coding")]
    Code,
    #[serde(rename = "testing")]
    Test,
}

pub const ORDERED_STAGES: [Stage; 5] = [
    Stage::Analysis,
    Stage::Planning,
    Stage::Blueprint,
    Stage::Code,
    Stage::Test,
];

impl Stage {
    /// Parse either the noun or gerund spelling of a stage name.
    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "analysis" => Some(Stage::Analysis),
            "planning" => Some(Stage::Planning),
            "blueprint" => Some(Stage::Blueprint),
            "code" | "coding" => Some(Stage::Code),
            "test" | "testing" => Some(Stage::Test),
            _ => None,
        }
    }

    /// Position in the fixed stage ordering, 0-based.
    pub fn position(self) -> usize {
        ORDERED_STAGES.iter().position(|s| *s == self).expect("exhaustive")
    }

    /// The stage that follows this one, or `None` after `test`.
    pub fn next(self) -> Option<Stage> {
        ORDERED_STAGES.get(self.position() + 1).copied()
    }

    /// Fixed broker topic this stage consumes from.
    pub fn input_topic(self) -> &'static str {
        match self {
            Stage::Analysis => "tasks.analysis",
            Stage::Planning => "tasks.planning",
            Stage::Blueprint => "tasks.blueprint",
            Stage::Code => "tasks.coding",
            Stage::Test => "tasks.testing",
        }
    }

    /// Fixed broker topic this stage publishes a success envelope to.
    /// The test stage has no next stage topic; it publishes to
    /// `tasks.completion` instead (see [`topics::COMPLETION`]).
    pub fn output_topic(self) -> &'static str {
        match self.next() {
            Some(next) => next.input_topic(),
            None => crate::topics::COMPLETION,
        }
    }

    /// Consumer group name for replicas of this stage's worker.
    pub fn consumer_group(self) -> String {
        format!("{}-agent-group", self.as_str())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Planning => "planning",
            Stage::Blueprint => "blueprint",
            Stage::Code => "code",
            Stage::Test => "test",
        }
    }

    /// Default per-delivery processing deadline.
    pub fn default_deadline(self) -> Duration {
        let secs = match self {
            Stage::Analysis => 600,
            Stage::Planning => 300,
            Stage::Blueprint => 600,
            Stage::Code => 1200,
            Stage::Test => 900,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_fixed() {
        assert_eq!(Stage::Analysis.position(), 0);
        assert_eq!(Stage::Test.position(), 4);
        assert!(Stage::Analysis < Stage::Test);
    }

    #[test]
    fn next_chains_to_test_then_none() {
        assert_eq!(Stage::Code.next(), Some(Stage::Test));
        assert_eq!(Stage::Test.next(), None);
    }

    #[test]
    fn output_topic_of_test_is_completion() {
        assert_eq!(Stage::Test.output_topic(), "tasks.completion");
        assert_eq!(Stage::Analysis.output_topic(), "tasks.planning");
    }

    #[test]
    fn parse_accepts_gerund_and_noun() {
        assert_eq!(Stage::parse("coding"), Some(Stage::Code));
        assert_eq!(Stage::parse("code"), Some(Stage::Code));
        assert_eq!(Stage::parse("bogus"), None);
    }
}
