//! The generic stage worker runtime: consume → validate → transform →
//! publish/skip/fail(retryable) loop shared by every pipeline stage.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use pipeline_core::{PipelineError, Stage, StageEnvelope, Transform, TransformOutcome};

use crate::error::FabricError;
use crate::traits::{BrokerAdapter, Delivery};
use crate::worker::Worker;

type IdempotencyKey = (String, Stage);

pub struct StageRuntimeConfig {
    pub worker_id: String,
    pub input_topic: String,
    pub output_topic: String,
    pub consumer_group: String,
    pub deadline: Duration,
    pub max_attempts: u32,
    pub poll_batch: usize,
    pub idle_sleep: Duration,
    pub idempotency_capacity: usize,
}

impl StageRuntimeConfig {
    pub fn for_stage(stage: Stage, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            input_topic: stage.input_topic().to_string(),
            output_topic: stage.output_topic().to_string(),
            consumer_group: stage.consumer_group(),
            deadline: stage.default_deadline(),
            max_attempts: 5,
            poll_batch: 1,
            idle_sleep: Duration::from_millis(200),
            idempotency_capacity: 4096,
        }
    }
}

struct Inner {
    broker: Arc<dyn BrokerAdapter>,
    transform: Arc<dyn Transform>,
    config: StageRuntimeConfig,
    seen: Mutex<LruCache<IdempotencyKey, ()>>,
}

impl Inner {
    async fn process_one(&self, delivery: Delivery) {
        let envelope = match StageEnvelope::from_json_bytes(&delivery.body) {
            Ok(env) => env,
            Err(err) => {
                warn!(error = %err, topic = %delivery.topic, "poison message, sending to dead-letter queue");
                if let Err(e) = self.broker.nack(delivery.tag, false).await {
                    error!(error = %e, "failed to nack poison message");
                }
                return;
            }
        };

        if envelope.stage != self.transform.stage() {
            warn!(
                request_id = %envelope.request_id,
                expected = %self.transform.stage(),
                actual = %envelope.stage,
                "envelope on wrong stage topic, dead-lettering"
            );
            let _ = self.broker.nack(delivery.tag, false).await;
            return;
        }

        if let Err(err) = envelope.validate_provenance() {
            warn!(request_id = %envelope.request_id, error = %err, "invalid provenance, dead-lettering");
            let _ = self.broker.nack(delivery.tag, false).await;
            return;
        }

        let key: IdempotencyKey = (envelope.request_id.clone(), envelope.stage);
        {
            let mut seen = self.seen.lock().await;
            if seen.put(key, ()).is_some() {
                info!(
                    request_id = %envelope.request_id,
                    stage = %envelope.stage,
                    "duplicate delivery, acking without reprocessing"
                );
                let _ = self.broker.ack(delivery.tag).await;
                return;
            }
        }

        let outcome = tokio::time::timeout(
            self.config.deadline,
            self.transform.apply(&envelope, &self.config.worker_id),
        )
        .await;

        match outcome {
            Ok(Ok(TransformOutcome::Publish(next))) => match next.to_json_bytes() {
                Ok(bytes) => {
                    if let Err(e) = self
                        .broker
                        .publish(&self.config.output_topic, &next.request_id, bytes)
                        .await
                    {
                        error!(error = %e, "failed to publish advanced envelope");
                        let _ = self.broker.nack(delivery.tag, true).await;
                        return;
                    }
                    let _ = self.broker.ack(delivery.tag).await;
                }
                Err(e) => {
                    error!(error = %e, "failed to encode advanced envelope");
                    let _ = self.broker.nack(delivery.tag, false).await;
                }
            },
            Ok(Ok(TransformOutcome::Skip)) => {
                let _ = self.broker.ack(delivery.tag).await;
            }
            Ok(Err(err)) => self.handle_failure(delivery, &envelope, err).await,
            Err(_) => {
                self.handle_failure(delivery, &envelope, PipelineError::Deadline(self.config.deadline))
                    .await
            }
        }
    }

    async fn handle_failure(&self, delivery: Delivery, envelope: &StageEnvelope, err: PipelineError) {
        let retryable = err.kind().retryable() && envelope.attempt < self.config.max_attempts;
        warn!(
            error = %err,
            attempt = envelope.attempt,
            max_attempts = self.config.max_attempts,
            retryable,
            "stage transform failed"
        );
        if !retryable {
            let event = pipeline_core::FailureEvent {
                request_id: envelope.request_id.clone(),
                stage: envelope.stage,
                error: err.to_string(),
            };
            match serde_json::to_vec(&event) {
                Ok(bytes) => {
                    if let Err(e) = self
                        .broker
                        .publish(pipeline_core::topics::ORCHESTRATION_FAILURES, &envelope.request_id, bytes)
                        .await
                    {
                        error!(error = %e, "failed to publish orchestration failure event");
                    }
                }
                Err(e) => error!(error = %e, "failed to encode orchestration failure event"),
            }
        }
        if let Err(e) = self.broker.nack(delivery.tag, retryable).await {
            error!(error = %e, "failed to nack failed delivery");
        }
    }

    async fn run_loop(self: Arc<Self>, stop: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                result = self.broker.poll(&self.config.input_topic, &self.config.consumer_group, self.config.poll_batch) => {
                    match result {
                        Ok(deliveries) if deliveries.is_empty() => {
                            tokio::time::sleep(self.config.idle_sleep).await;
                        }
                        Ok(deliveries) => {
                            for delivery in deliveries {
                                self.process_one(delivery).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, topic = %self.config.input_topic, "broker poll failed");
                            tokio::time::sleep(self.config.idle_sleep).await;
                        }
                    }
                }
            }
        }
    }
}

/// The [`Worker`] that drives one stage's [`Transform`] against the broker,
/// generic over which stage it is (selected by the `Transform` it wraps).
pub struct StageRuntime {
    inner: Arc<Inner>,
    stop: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StageRuntime {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        transform: Arc<dyn Transform>,
        config: StageRuntimeConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.idempotency_capacity.max(1)).unwrap();
        Self {
            inner: Arc::new(Inner {
                broker,
                transform,
                config,
                seen: Mutex::new(LruCache::new(capacity)),
            }),
            stop: Arc::new(Notify::new()),
            loop_handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Worker for StageRuntime {
    async fn start(&self) -> Result<(), FabricError> {
        let inner = Arc::clone(&self.inner);
        let stop = Arc::clone(&self.stop);
        let handle = tokio::spawn(Inner::run_loop(inner, stop));
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), FabricError> {
        self.stop.notify_waiters();
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.inner.config.worker_id
    }
}
