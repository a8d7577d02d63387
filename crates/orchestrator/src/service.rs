//! The central orchestrator (C6): rebuilds per-request state by observing
//! every stage topic plus `tasks.completion`, `orchestration.failures` and
//! `orchestration.events`, and republishes each transition as a
//! [`DashboardEvent`] for the fan-out hub (C8) to consume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::{ControlEvent, CurrentStage, FailureEvent, PipelineState, StageEnvelope, TestPayload};
use pipeline_fabric::{BrokerAdapter, Delivery, FabricError, Worker};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::event::DashboardEvent;

pub struct OrchestratorConfig {
    pub poll_batch: usize,
    pub idle_sleep: Duration,
    pub stall_check_interval: Duration,
    pub stall_threshold: Duration,
    pub dashboard_buffer: usize,
}

impl OrchestratorConfig {
    pub fn from_section(section: &pipeline_core::config::OrchestratorSection) -> Self {
        Self {
            stall_check_interval: section.stall_check_interval(),
            stall_threshold: section.stall_threshold(),
            ..Self::default()
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_batch: 16,
            idle_sleep: Duration::from_millis(200),
            stall_check_interval: Duration::from_secs(30),
            stall_threshold: Duration::from_secs(600),
            dashboard_buffer: 256,
        }
    }
}

struct Inner {
    broker: Arc<dyn BrokerAdapter>,
    states: Mutex<HashMap<String, PipelineState>>,
    tx: broadcast::Sender<DashboardEvent>,
    config: OrchestratorConfig,
}

impl Inner {
    /// Drain every subscribed topic's full backlog under `orchestrator-group`
    /// without emitting live transition events, then publish one `Snapshot`
    /// per reconstructed request. Relies on the broker replaying everything
    /// it still retains to a consumer group seen for the first time.
    async fn recover(&self) {
        for topic in pipeline_core::topics::all_stage_topics() {
            loop {
                match self
                    .broker
                    .poll(topic, pipeline_core::topics::ORCHESTRATOR_GROUP, self.config.poll_batch)
                    .await
                {
                    Ok(deliveries) if deliveries.is_empty() => break,
                    Ok(deliveries) => {
                        for delivery in deliveries {
                            self.handle_delivery(topic, delivery, false).await;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, topic, "orchestrator recovery poll failed");
                        break;
                    }
                }
            }
        }
        let snapshot: Vec<PipelineState> = self.states.lock().await.values().cloned().collect();
        for state in snapshot {
            let _ = self.tx.send(DashboardEvent::Snapshot { state });
        }
    }

    async fn run_loop(self: Arc<Self>, stop: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = self.poll_pass() => {}
            }
        }
    }

    async fn poll_pass(&self) {
        let mut any = false;
        for topic in pipeline_core::topics::all_stage_topics() {
            match self
                .broker
                .poll(topic, pipeline_core::topics::ORCHESTRATOR_GROUP, self.config.poll_batch)
                .await
            {
                Ok(deliveries) if deliveries.is_empty() => {}
                Ok(deliveries) => {
                    any = true;
                    for delivery in deliveries {
                        self.handle_delivery(topic, delivery, true).await;
                    }
                }
                Err(e) => error!(error = %e, topic, "orchestrator poll failed"),
            }
        }
        if !any {
            tokio::time::sleep(self.config.idle_sleep).await;
        }
    }

    async fn stall_sweep_loop(self: Arc<Self>, stop: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.config.stall_check_interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                _ = ticker.tick() => self.sweep_stalled().await,
            }
        }
    }

    async fn sweep_stalled(&self) {
        let now = Utc::now();
        let threshold =
            chrono::Duration::from_std(self.config.stall_threshold).unwrap_or_else(|_| chrono::Duration::zero());
        let mut newly_stalled = Vec::new();
        {
            let mut states = self.states.lock().await;
            for state in states.values_mut() {
                if state.terminal || state.stalled {
                    continue;
                }
                if now - state.last_event_at >= threshold {
                    state.mark_stalled();
                    newly_stalled.push(state.request_id.clone());
                }
            }
        }
        for request_id in newly_stalled {
            let _ = self.tx.send(DashboardEvent::Stalled { request_id, at: now });
        }
    }

    async fn handle_delivery(&self, topic: &str, delivery: Delivery, emit: bool) {
        if topic == pipeline_core::topics::COMPLETION {
            self.handle_completion(delivery, emit).await;
        } else if topic == pipeline_core::topics::ORCHESTRATION_FAILURES {
            self.handle_failure_event(delivery, emit).await;
        } else if topic == pipeline_core::topics::ORCHESTRATION_EVENTS {
            self.handle_control_event(delivery, emit).await;
        } else {
            self.handle_stage_envelope(delivery, emit).await;
        }
    }

    async fn handle_stage_envelope(&self, delivery: Delivery, emit: bool) {
        let now = Utc::now();
        let envelope = match StageEnvelope::from_json_bytes(&delivery.body) {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, topic = %delivery.topic, "orchestrator failed to decode stage envelope");
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        };
        let to = CurrentStage::from_stage(envelope.stage);
        let summary = envelope
            .typed_payload()
            .map(|p| p.summarize())
            .unwrap_or_else(|_| serde_json::json!({}));
        self.apply_transition(&envelope.request_id, to, now, summary, emit).await;
        let _ = self.broker.ack(delivery.tag).await;
    }

    async fn handle_completion(&self, delivery: Delivery, emit: bool) {
        let now = Utc::now();
        let envelope = match StageEnvelope::from_json_bytes(&delivery.body) {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "orchestrator failed to decode completion envelope");
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        };
        let payload: TestPayload = match envelope.decode_payload() {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, request_id = %envelope.request_id, "orchestrator failed to decode completion payload");
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        };
        let (from, to, changed) = {
            let mut states = self.states.lock().await;
            let state = states
                .entry(envelope.request_id.clone())
                .or_insert_with(|| PipelineState::new(envelope.request_id.clone(), now));
            let from = state.current_stage;
            if payload.status == "success" {
                state.observe_completed(payload.artifact_ref.clone(), now);
            } else {
                state.observe_failed(
                    CurrentStage::Test,
                    format!("tests failed: {}", payload.test_results.summary),
                    now,
                );
            }
            (from, state.current_stage, state.current_stage != from)
        };
        if emit && changed {
            let _ = self.tx.send(DashboardEvent::Transition {
                request_id: envelope.request_id.clone(),
                from,
                to,
                at: now,
                stage_payload_summary: serde_json::json!({
                    "status": payload.status,
                    "coverage": payload.coverage,
                    "artifact": payload.artifact_ref,
                }),
            });
        }
        let _ = self.broker.ack(delivery.tag).await;
    }

    async fn handle_failure_event(&self, delivery: Delivery, emit: bool) {
        let now = Utc::now();
        let event: FailureEvent = match serde_json::from_slice(&delivery.body) {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "orchestrator failed to decode failure event");
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        };
        let (from, changed) = {
            let mut states = self.states.lock().await;
            let state = states
                .entry(event.request_id.clone())
                .or_insert_with(|| PipelineState::new(event.request_id.clone(), now));
            let from = state.current_stage;
            state.observe_failed(CurrentStage::from_stage(event.stage), event.error.clone(), now);
            (from, state.current_stage != from)
        };
        if emit && changed {
            let _ = self.tx.send(DashboardEvent::Transition {
                request_id: event.request_id.clone(),
                from,
                to: CurrentStage::Failed,
                at: now,
                stage_payload_summary: serde_json::json!({ "error": event.error, "stage": event.stage }),
            });
        }
        let _ = self.broker.ack(delivery.tag).await;
    }

    async fn handle_control_event(&self, delivery: Delivery, emit: bool) {
        let now = Utc::now();
        let event: ControlEvent = match serde_json::from_slice(&delivery.body) {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "orchestrator failed to decode control event");
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        };
        match event {
            ControlEvent::Cancel { request_id } => {
                let (from, changed) = {
                    let mut states = self.states.lock().await;
                    let state = states
                        .entry(request_id.clone())
                        .or_insert_with(|| PipelineState::new(request_id.clone(), now));
                    let from = state.current_stage;
                    state.observe_cancelled(now);
                    (from, state.current_stage != from)
                };
                if emit && changed {
                    let _ = self.tx.send(DashboardEvent::Transition {
                        request_id,
                        from,
                        to: CurrentStage::Cancelled,
                        at: now,
                        stage_payload_summary: serde_json::json!({}),
                    });
                }
            }
        }
        let _ = self.broker.ack(delivery.tag).await;
    }

    async fn apply_transition(
        &self,
        request_id: &str,
        to: CurrentStage,
        now: DateTime<Utc>,
        summary: serde_json::Value,
        emit: bool,
    ) {
        let (from, became_unstalled, changed) = {
            let mut states = self.states.lock().await;
            let state = states
                .entry(request_id.to_string())
                .or_insert_with(|| PipelineState::new(request_id.to_string(), now));
            let from = state.current_stage;
            let was_stalled = state.stalled;
            state.observe_stage(to, now);
            (from, was_stalled && !state.stalled, state.current_stage != from)
        };
        if !emit {
            return;
        }
        if became_unstalled {
            let _ = self.tx.send(DashboardEvent::Unstalled {
                request_id: request_id.to_string(),
                at: now,
            });
        }
        if changed {
            let _ = self.tx.send(DashboardEvent::Transition {
                request_id: request_id.to_string(),
                from,
                to,
                at: now,
                stage_payload_summary: summary,
            });
        }
    }
}

/// The [`Worker`] driving the orchestrator's recovery, polling and
/// stall-detection loops.
pub struct Orchestrator {
    inner: Arc<Inner>,
    stop: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(broker: Arc<dyn BrokerAdapter>, config: OrchestratorConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.dashboard_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                broker,
                states: Mutex::new(HashMap::new()),
                tx,
                config,
            }),
            stop: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the live dashboard event stream (C8's fan-out hub uses
    /// this to seed each client's per-connection channel).
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.inner.tx.subscribe()
    }

    pub async fn state(&self, request_id: &str) -> Option<PipelineState> {
        self.inner.states.lock().await.get(request_id).cloned()
    }

    pub async fn list(&self) -> Vec<PipelineState> {
        self.inner.states.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl Worker for Orchestrator {
    async fn start(&self) -> Result<(), FabricError> {
        self.inner.recover().await;
        let run_inner = Arc::clone(&self.inner);
        let run_stop = Arc::clone(&self.stop);
        let run_handle = tokio::spawn(Inner::run_loop(run_inner, run_stop));
        let sweep_inner = Arc::clone(&self.inner);
        let sweep_stop = Arc::clone(&self.stop);
        let sweep_handle = tokio::spawn(Inner::stall_sweep_loop(sweep_inner, sweep_stop));
        *self.handles.lock().await = vec![run_handle, sweep_handle];
        Ok(())
    }

    async fn stop(&self) -> Result<(), FabricError> {
        self.stop.notify_waiters();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "orchestrator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::envelope::{AnalysisPayload, CodePayload, TestResults};
    use pipeline_core::{Stage, Submission};
    use pipeline_fabric::InProcessBroker;

    fn seed_envelope(request_id: &str) -> StageEnvelope {
        let submission = Submission::NewProject {
            description: "a todo app".into(),
            requirements: vec![],
            constraints: vec![],
            prefs: vec![],
        };
        let payload = AnalysisPayload::from_submission(&submission).unwrap();
        StageEnvelope::new(request_id, Stage::Analysis, &payload).unwrap()
    }

    #[tokio::test]
    async fn first_envelope_transitions_submitted_to_analysis() {
        let broker = Arc::new(InProcessBroker::new());
        broker
            .publish(
                Stage::Analysis.input_topic(),
                "req-1",
                seed_envelope("req-1").to_json_bytes().unwrap(),
            )
            .await
            .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(broker, OrchestratorConfig::default()));
        let mut rx = orchestrator.subscribe();
        Worker::start(&*orchestrator).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        Worker::stop(&*orchestrator).await.unwrap();

        let state = orchestrator.state("req-1").await.unwrap();
        assert_eq!(state.current_stage, CurrentStage::Analysis);

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, DashboardEvent::Transition { to: CurrentStage::Analysis, .. }));
    }

    #[tokio::test]
    async fn completion_event_marks_request_completed() {
        let broker = Arc::new(InProcessBroker::new());
        let env = seed_envelope("req-2");
        let _ = env.decode_payload::<AnalysisPayload>().unwrap();
        let code = CodePayload {
            blueprint: Default::default(),
            files: Default::default(),
            repo_hint: "demo".into(),
        };
        let test_payload = pipeline_core::TestPayload {
            code,
            test_results: TestResults {
                passed: 4,
                failed: 0,
                total: 4,
                summary: "all green".into(),
            },
            coverage: 0.91,
            artifact_ref: None,
            status: "success".into(),
        };
        let completion = env.complete("test-worker-1", &test_payload).unwrap();
        broker
            .publish(pipeline_core::topics::COMPLETION, "req-2", completion.to_json_bytes().unwrap())
            .await
            .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(broker, OrchestratorConfig::default()));
        Worker::start(&*orchestrator).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        Worker::stop(&*orchestrator).await.unwrap();

        let state = orchestrator.state("req-2").await.unwrap();
        assert_eq!(state.current_stage, CurrentStage::Completed);
        assert!(state.terminal);
    }

    #[tokio::test]
    async fn recovery_replays_backlog_as_snapshot_not_transition() {
        let broker = Arc::new(InProcessBroker::new());
        broker
            .publish(
                Stage::Analysis.input_topic(),
                "req-3",
                seed_envelope("req-3").to_json_bytes().unwrap(),
            )
            .await
            .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(broker, OrchestratorConfig::default()));
        let mut rx = orchestrator.subscribe();
        Worker::start(&*orchestrator).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        Worker::stop(&*orchestrator).await.unwrap();

        let mut saw_snapshot = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DashboardEvent::Snapshot { .. }) {
                saw_snapshot = true;
            }
            assert!(!matches!(event, DashboardEvent::Transition { .. }));
        }
        assert!(saw_snapshot, "recovery should emit a snapshot for the replayed request");
    }

    #[tokio::test]
    async fn failure_event_marks_request_failed() {
        let broker = Arc::new(InProcessBroker::new());
        broker
            .publish(
                pipeline_core::topics::ORCHESTRATION_FAILURES,
                "req-4",
                serde_json::to_vec(&FailureEvent {
                    request_id: "req-4".into(),
                    stage: Stage::Code,
                    error: "generator exhausted retries".into(),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(broker, OrchestratorConfig::default()));
        Worker::start(&*orchestrator).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        Worker::stop(&*orchestrator).await.unwrap();

        let state = orchestrator.state("req-4").await.unwrap();
        assert_eq!(state.current_stage, CurrentStage::Failed);
        assert_eq!(state.failure_stage, Some(CurrentStage::Code));
    }
}
