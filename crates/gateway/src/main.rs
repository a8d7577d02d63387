//! Process entrypoint. Because the broker in this tree is an in-process
//! log rather than a network service, the stage workers, the orchestrator,
//! and the gateway's own HTTP surface all run inside this one process,
//! sharing a single `Arc<dyn BrokerAdapter>` — the "distributed" pipeline is
//! simulated by concurrent tasks rather than concurrent OS processes.

use std::sync::Arc;
use std::time::Duration;

use pipeline_artifacts::{GitArtifactStore, GitArtifactStoreConfig};
use pipeline_core::{PipelineConfig, ORDERED_STAGES};
use pipeline_fabric::{InProcessBroker, Worker, WorkerBuilder, WorkerRunner};
use pipeline_gateway::{build_router, AppState};
use pipeline_generator::{HttpGeneratorClient, HttpGeneratorClientConfig};
use pipeline_orchestrator::{Orchestrator, OrchestratorConfig};
use pipeline_telemetry::GatewayMetrics;
use tokio::sync::Notify;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config = PipelineConfig::from_env();
    config.validate().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    config.log_summary();

    let broker: Arc<dyn pipeline_fabric::BrokerAdapter> = Arc::new(InProcessBroker::new());

    let generator = Arc::new(HttpGeneratorClient::new(HttpGeneratorClientConfig {
        endpoint: config.generator.endpoint.clone(),
        api_key: config.generator.api_key.clone(),
        timeout: Duration::from_secs(config.generator.timeout_seconds),
        max_retries: 5,
        retry_budget: Duration::from_secs(30),
        requests_per_minute: config.generator.max_rpm,
    }));

    let artifacts = Arc::new(GitArtifactStore::new(GitArtifactStoreConfig::new(
        config.artifact_store.url.clone(),
    )));

    let shutdown = Arc::new(Notify::new());
    let mut worker_handles = Vec::new();

    for stage in ORDERED_STAGES {
        let runtime = Arc::new(pipeline_stage_worker::build_runtime(
            stage,
            broker.clone(),
            generator.clone(),
            artifacts.clone(),
            &config,
        ));
        let worker_config = WorkerBuilder::new(runtime.name().to_string()).build();
        let worker: Arc<dyn Worker> = runtime;
        let shutdown = shutdown.clone();
        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = WorkerRunner::run(worker, worker_config, Some(shutdown)).await {
                error!(error = %e, "stage worker exited with error");
            }
        }));
    }

    let mut orchestrator_config = OrchestratorConfig::from_section(&config.orchestrator);
    orchestrator_config.dashboard_buffer = config.gateway.dashboard_ws_buffer;
    let orchestrator = Arc::new(Orchestrator::new(broker.clone(), orchestrator_config));

    let orchestrator_worker: Arc<dyn Worker> = orchestrator.clone();
    let orchestrator_runner_config = WorkerBuilder::new("orchestrator").build();
    let orchestrator_shutdown = shutdown.clone();
    worker_handles.push(tokio::spawn(async move {
        if let Err(e) = WorkerRunner::run(
            orchestrator_worker,
            orchestrator_runner_config,
            Some(orchestrator_shutdown),
        )
        .await
        {
            error!(error = %e, "orchestrator exited with error");
        }
    }));

    let metrics = GatewayMetrics::new().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let state = Arc::new(AppState {
        broker,
        orchestrator,
        metrics,
        config: config.gateway.clone(),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gateway listening");

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.notify_waiters();
    for handle in worker_handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
