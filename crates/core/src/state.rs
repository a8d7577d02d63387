use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// [`Stage`] extended with the terminal/pre-stage states the orchestrator
/// tracks but no worker ever sees on an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentStage {
    Submitted,
    Analysis,
    Planning,
    Blueprint,
    Code,
    Test,
    Completed,
    Failed,
    Cancelled,
}

impl CurrentStage {
    pub fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::Analysis => CurrentStage::Analysis,
            Stage::Planning => CurrentStage::Planning,
            Stage::Blueprint => CurrentStage::Blueprint,
            Stage::Code => CurrentStage::Code,
            Stage::Test => CurrentStage::Test,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CurrentStage::Completed | CurrentStage::Failed | CurrentStage::Cancelled
        )
    }

    /// Ordinal used to detect backwards transitions; terminal states sort
    /// after every in-flight stage since they can only be reached from one.
    fn rank(self) -> u8 {
        match self {
            CurrentStage::Submitted => 0,
            CurrentStage::Analysis => 1,
            CurrentStage::Planning => 2,
            CurrentStage::Blueprint => 3,
            CurrentStage::Code => 4,
            CurrentStage::Test => 5,
            CurrentStage::Completed | CurrentStage::Failed | CurrentStage::Cancelled => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage: CurrentStage,
    pub entered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// The orchestrator's per-request view, rebuildable purely by replaying
/// stage/completion/failure events in publish order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub request_id: String,
    pub current_stage: CurrentStage,
    pub stage_history: Vec<StageHistoryEntry>,
    pub last_event_at: DateTime<Utc>,
    pub terminal: bool,
    pub stalled: bool,
    pub duplicate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_stage: Option<CurrentStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artifact_ref: Option<crate::artifact::ArtifactRef>,
}

impl PipelineState {
    pub fn new(request_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.into(),
            current_stage: CurrentStage::Submitted,
            stage_history: vec![StageHistoryEntry {
                stage: CurrentStage::Submitted,
                entered_at: now,
                completed_at: None,
                attempts: 1,
            }],
            last_event_at: now,
            terminal: false,
            stalled: false,
            duplicate_count: 0,
            failure_reason: None,
            failure_stage: None,
            artifact_ref: None,
        }
    }

    /// Advance to `stage` at time `now`, or treat it as a late duplicate if
    /// `stage` does not strictly follow the current one. Mirrors invariant 3
    /// in the data model: backwards transitions leave state unchanged except
    /// for the duplicate counter.
    pub fn observe_stage(&mut self, stage: CurrentStage, now: DateTime<Utc>) {
        self.last_event_at = now;
        if self.terminal {
            self.duplicate_count += 1;
            return;
        }
        if stage.rank() <= self.current_stage.rank() {
            self.duplicate_count += 1;
            return;
        }
        if let Some(last) = self.stage_history.last_mut() {
            last.completed_at = Some(now);
        }
        self.current_stage = stage;
        self.stalled = false;
        self.stage_history.push(StageHistoryEntry {
            stage,
            entered_at: now,
            completed_at: None,
            attempts: 1,
        });
    }

    pub fn observe_completed(&mut self, artifact_ref: Option<crate::artifact::ArtifactRef>, now: DateTime<Utc>) {
        if self.terminal {
            self.duplicate_count += 1;
            return;
        }
        if let Some(last) = self.stage_history.last_mut() {
            last.completed_at = Some(now);
        }
        self.current_stage = CurrentStage::Completed;
        self.terminal = true;
        self.stalled = false;
        self.last_event_at = now;
        self.artifact_ref = artifact_ref;
    }

    pub fn observe_failed(&mut self, stage: CurrentStage, reason: String, now: DateTime<Utc>) {
        if self.terminal {
            self.duplicate_count += 1;
            return;
        }
        self.current_stage = CurrentStage::Failed;
        self.terminal = true;
        self.stalled = false;
        self.last_event_at = now;
        self.failure_reason = Some(reason);
        self.failure_stage = Some(stage);
    }

    pub fn observe_cancelled(&mut self, now: DateTime<Utc>) {
        if self.terminal {
            self.duplicate_count += 1;
            return;
        }
        self.current_stage = CurrentStage::Cancelled;
        self.terminal = true;
        self.stalled = false;
        self.last_event_at = now;
    }

    pub fn mark_stalled(&mut self) {
        if !self.terminal {
            self.stalled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(offset_secs)
    }

    #[test]
    fn monotonic_progression() {
        let mut state = PipelineState::new("r1", t(0));
        state.observe_stage(CurrentStage::Analysis, t(1));
        state.observe_stage(CurrentStage::Planning, t(2));
        assert_eq!(state.current_stage, CurrentStage::Planning);
        assert_eq!(state.stage_history.len(), 3);
        assert_eq!(state.duplicate_count, 0);
    }

    #[test]
    fn backwards_transition_is_late_duplicate() {
        let mut state = PipelineState::new("r1", t(0));
        state.observe_stage(CurrentStage::Planning, t(1));
        state.observe_stage(CurrentStage::Analysis, t(2));
        assert_eq!(state.current_stage, CurrentStage::Planning);
        assert_eq!(state.duplicate_count, 1);
    }

    #[test]
    fn terminal_states_ignore_further_events() {
        let mut state = PipelineState::new("r1", t(0));
        state.observe_completed(None, t(1));
        assert!(state.terminal);
        state.observe_stage(CurrentStage::Test, t(2));
        assert_eq!(state.duplicate_count, 1);
        assert_eq!(state.current_stage, CurrentStage::Completed);
    }
}
