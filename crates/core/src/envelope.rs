use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::error::PipelineError;
use crate::stage::Stage;
use crate::submission::Submission;

pub type ExtraMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

fn default_priority() -> i32 {
    3
}

/// A unit of work within `analysis.payload.tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// `id` must match `[A-Za-z0-9_-]+`, `title`/`description` non-empty.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let id_ok = !self.id.is_empty()
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !id_ok {
            return Err(PipelineError::Validation(format!(
                "task id '{}' does not match [A-Za-z0-9_-]+",
                self.id
            )));
        }
        if self.title.is_empty() {
            return Err(PipelineError::Validation(format!(
                "task '{}' has an empty title",
                self.id
            )));
        }
        if self.description.is_empty() {
            return Err(PipelineError::Validation(format!(
                "task '{}' has an empty description",
                self.id
            )));
        }
        if !(1..=5).contains(&self.priority) {
            return Err(PipelineError::Validation(format!(
                "task '{}' priority {} out of range 1..=5",
                self.id, self.priority
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for dep in &self.dependencies {
            if !seen.insert(dep) {
                return Err(PipelineError::Validation(format!(
                    "task '{}' lists dependency '{}' more than once",
                    self.id, dep
                )));
            }
        }
        Ok(())
    }
}

// ── Stage payloads, each strictly extending the previous ──────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisPayload {
    pub tasks: Vec<Task>,
    pub intent: String,
    pub constraints: Vec<String>,
    #[serde(flatten, default)]
    pub extra: ExtraMap,
}

impl AnalysisPayload {
    /// The shape the gateway constructs for the very first envelope: empty
    /// placeholders for the fields the Analysis transform is responsible for
    /// producing, with the raw submission stowed in `extra` so the transform
    /// has something to work from.
    pub fn from_submission(submission: &Submission) -> Result<Self, PipelineError> {
        let mut extra = ExtraMap::new();
        extra.insert("submission".to_string(), serde_json::to_value(submission)?);
        Ok(Self {
            tasks: Vec::new(),
            intent: String::new(),
            constraints: Vec::new(),
            extra,
        })
    }

    /// Recover the submission stowed by [`AnalysisPayload::from_submission`].
    /// Absent once the Analysis transform has replaced this payload with its
    /// own output, so callers should only look for it on the initial envelope.
    pub fn submission(&self) -> Result<Submission, PipelineError> {
        let value = self.extra.get("submission").ok_or_else(|| {
            PipelineError::Validation("analysis payload has no submission in extra".into())
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::Validation(format!("invalid submission: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanningPayload {
    #[serde(flatten)]
    pub analysis: AnalysisPayload,
    pub ordered_tasks: Vec<String>,
    pub dependencies: HashMap<String, Vec<String>>,
    pub parallel_groups: Vec<Vec<String>>,
    pub timeline: Vec<String>,
    pub risks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Component {
    pub name: String,
    pub kind: String,
    pub description: String,
    /// File paths this component expects to exist in `code.payload.files`.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BlueprintPayload {
    #[serde(flatten)]
    pub planning: PlanningPayload,
    pub components: Vec<Component>,
    pub data_model: serde_json::Value,
    pub api_spec: serde_json::Value,
    pub deployment_plan: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodePayload {
    #[serde(flatten)]
    pub blueprint: BlueprintPayload,
    pub files: HashMap<String, String>,
    pub repo_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestPayload {
    #[serde(flatten)]
    pub code: CodePayload,
    pub test_results: TestResults,
    pub coverage: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artifact_ref: Option<ArtifactRef>,
    /// `"success"` or `"failure"`, mirrored into the completion event.
    #[serde(default)]
    pub status: String,
}

/// A strictly-typed view of an envelope's payload, selected by the
/// envelope's `stage` field rather than an internal tag — the wire format
/// carries `stage` once, as a sibling of `payload`, not duplicated inside it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Analysis(AnalysisPayload),
    Planning(PlanningPayload),
    Blueprint(BlueprintPayload),
    Code(CodePayload),
    Test(TestPayload),
}

impl Payload {
    /// Bounded projection used for dashboard events — counts and sizes,
    /// never the full payload (see orchestrator emission policy).
    pub fn summarize(&self) -> serde_json::Value {
        match self {
            Payload::Analysis(p) => serde_json::json!({ "tasks": p.tasks.len() }),
            Payload::Planning(p) => serde_json::json!({
                "tasks": p.analysis.tasks.len(),
                "parallel_groups": p.parallel_groups.len(),
            }),
            Payload::Blueprint(p) => serde_json::json!({
                "tasks": p.planning.analysis.tasks.len(),
                "components": p.components.len(),
            }),
            Payload::Code(p) => serde_json::json!({ "files": p.files.len() }),
            Payload::Test(p) => serde_json::json!({
                "passed": p.test_results.passed,
                "failed": p.test_results.failed,
                "coverage": p.coverage,
            }),
        }
    }
}

// ── Provenance & correlation ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub stage: Stage,
    pub produced_at: DateTime<Utc>,
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub trace_id: String,
    pub span_id: String,
}

// ── The envelope itself ────────────────────────────────────────

/// The wire message carried between stages. `payload` is kept as a raw JSON
/// value at the envelope level; callers decode it into the stage-specific
/// struct they expect via [`StageEnvelope::decode_payload`] or
/// [`StageEnvelope::typed_payload`].
///
/// `stage` names the worker that owns this envelope next, matching the topic
/// it was published to (`Stage::input_topic`) — not the shape already inside
/// `payload`. A worker's own transform is what extends `payload` to match
/// its stage's full shape, immediately before calling [`Self::advance`] to
/// hand off to the stage after it; until then, `payload` still holds
/// whatever the *previous* stage produced. `typed_payload` decodes with that
/// in mind. The one exception is `tasks.completion`: an envelope there keeps
/// `stage == Test` (see [`Self::complete`]) but its payload is the finished
/// `TestPayload`, so callers reading that topic should call
/// `decode_payload::<TestPayload>()` directly rather than `typed_payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEnvelope {
    pub request_id: String,
    pub stage: Stage,
    pub attempt: u32,
    pub produced_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub provenance: Vec<ProvenanceEntry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation: Option<Correlation>,
}

impl StageEnvelope {
    pub fn new<T: Serialize>(
        request_id: impl Into<String>,
        stage: Stage,
        payload: &T,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            request_id: request_id.into(),
            stage,
            attempt: 1,
            produced_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
            provenance: Vec::new(),
            correlation: None,
        })
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| PipelineError::Validation(format!("payload decode failed: {e}")))
    }

    /// Decodes `payload` as whichever shape is actually present given
    /// `stage` (see the struct-level note on the `stage`/`payload`
    /// relationship): the stage a worker hands an envelope to sees the
    /// *previous* stage's full payload, not its own.
    pub fn typed_payload(&self) -> Result<Payload, PipelineError> {
        match self.stage {
            Stage::Analysis => self.decode_payload().map(Payload::Analysis),
            Stage::Planning => self.decode_payload().map(Payload::Analysis),
            Stage::Blueprint => self.decode_payload().map(Payload::Planning),
            Stage::Code => self.decode_payload().map(Payload::Blueprint),
            Stage::Test => self.decode_payload().map(Payload::Code),
        }
    }

    /// Each prior provenance entry's stage must strictly precede the one
    /// following it, and all must precede this envelope's own stage.
    pub fn validate_provenance(&self) -> Result<(), PipelineError> {
        if self.attempt < 1 {
            return Err(PipelineError::Validation("attempt must be >= 1".into()));
        }
        let mut last: Option<Stage> = None;
        for entry in &self.provenance {
            if let Some(prev) = last {
                if entry.stage <= prev {
                    return Err(PipelineError::Validation(
                        "provenance is not strictly increasing".into(),
                    ));
                }
            }
            last = Some(entry.stage);
        }
        if let Some(prev) = last {
            if prev >= self.stage {
                return Err(PipelineError::Validation(format!(
                    "provenance entry for stage {prev} does not precede envelope stage {}",
                    self.stage
                )));
            }
        }
        Ok(())
    }

    /// Build the successor envelope published on the way out of a worker:
    /// `attempt` resets to 1, and the current stage is appended to
    /// provenance with the given worker id.
    pub fn advance<T: Serialize>(
        &self,
        next_stage: Stage,
        worker_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, PipelineError> {
        let mut provenance = self.provenance.clone();
        provenance.push(ProvenanceEntry {
            stage: self.stage,
            produced_at: Utc::now(),
            worker_id: worker_id.into(),
        });
        Ok(Self {
            request_id: self.request_id.clone(),
            stage: next_stage,
            attempt: 1,
            produced_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
            provenance,
            correlation: self.correlation.clone(),
        })
    }

    /// Build the terminal envelope published when a stage has no
    /// successor (today, only `test`): the stage field is unchanged, but
    /// it is still appended to provenance and the payload replaced.
    pub fn complete<T: Serialize>(
        &self,
        worker_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, PipelineError> {
        let mut provenance = self.provenance.clone();
        provenance.push(ProvenanceEntry {
            stage: self.stage,
            produced_at: Utc::now(),
            worker_id: worker_id.into(),
        });
        Ok(Self {
            request_id: self.request_id.clone(),
            stage: self.stage,
            attempt: 1,
            produced_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
            provenance,
            correlation: self.correlation.clone(),
        })
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::Validation(format!("envelope decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_validates_id_pattern() {
        let mut t = Task {
            id: "ok_id-1".into(),
            title: "t".into(),
            description: "d".into(),
            dependencies: vec![],
            priority: 3,
            status: TaskStatus::Pending,
        };
        assert!(t.validate().is_ok());
        t.id = "not ok".into();
        assert!(t.validate().is_err());
    }

    #[test]
    fn envelope_roundtrips_through_json() {
        let payload = AnalysisPayload {
            tasks: vec![],
            intent: "build a todo app".into(),
            constraints: vec![],
            extra: Default::default(),
        };
        let env = StageEnvelope::new("req-1", Stage::Analysis, &payload).unwrap();
        let bytes = env.to_json_bytes().unwrap();
        let back = StageEnvelope::from_json_bytes(&bytes).unwrap();
        assert_eq!(back.request_id, "req-1");
        assert_eq!(back.stage, Stage::Analysis);
        let decoded: AnalysisPayload = back.decode_payload().unwrap();
        assert_eq!(decoded.intent, "build a todo app");
    }

    #[test]
    fn advance_appends_provenance_and_resets_attempt() {
        let payload = AnalysisPayload {
            tasks: vec![],
            intent: "x".into(),
            constraints: vec![],
            extra: Default::default(),
        };
        let mut env = StageEnvelope::new("req-1", Stage::Analysis, &payload).unwrap();
        env.attempt = 3;
        let planning = PlanningPayload {
            analysis: payload,
            ..Default::default()
        };
        let next = env.advance(Stage::Planning, "worker-1", &planning).unwrap();
        assert_eq!(next.attempt, 1);
        assert_eq!(next.provenance.len(), 1);
        assert_eq!(next.provenance[0].stage, Stage::Analysis);
        assert!(next.validate_provenance().is_ok());
    }

    #[test]
    fn unknown_keys_are_preserved_in_extra() {
        let raw = serde_json::json!({
            "tasks": [],
            "intent": "x",
            "constraints": [],
            "from_the_future": "value"
        });
        let payload: AnalysisPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(
            payload.extra.get("from_the_future").unwrap(),
            "value"
        );
    }
}
