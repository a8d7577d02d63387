//! Worker trait and lifecycle management.
//!
//! Provides the [`Worker`] trait for long-running processes and
//! [`WorkerRunner`] for driving one through health pings and graceful
//! shutdown. [`StageRuntime`](crate::stage_runtime::StageRuntime) is the
//! concrete [`Worker`] that actually consumes and transforms envelopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::FabricError;

#[async_trait]
pub trait Worker: Send + Sync {
    /// Called once when the worker starts. Set up subscriptions, spawn the
    /// consume loop, etc.
    async fn start(&self) -> Result<(), FabricError>;

    /// Called once during graceful shutdown. Drain in-flight work.
    async fn stop(&self) -> Result<(), FabricError>;

    /// Human-readable name for this worker (used in logging).
    fn name(&self) -> &str;
}

pub struct WorkerRunnerConfig {
    pub name: String,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
}

/// Fluent builder for a [`WorkerRunnerConfig`].
pub struct WorkerBuilder {
    name: String,
    health_interval: Duration,
    shutdown_timeout: Duration,
}

impl WorkerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Set the interval between health log lines (default: 30s).
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the maximum time to wait for in-flight work during shutdown
    /// (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> WorkerRunnerConfig {
        WorkerRunnerConfig {
            name: self.name,
            health_interval: self.health_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Runs a [`Worker`] with automatic health pings and graceful shutdown.
///
/// Manages three concurrent tasks: a health ping loop, a signal handler
/// listening for SIGINT/SIGTERM, and the worker's own start/stop lifecycle.
pub struct WorkerRunner;

impl WorkerRunner {
    /// Run a worker to completion. Blocks until a shutdown signal is
    /// received or `shutdown_notify` is triggered.
    pub async fn run(
        worker: Arc<dyn Worker>,
        config: WorkerRunnerConfig,
        shutdown_notify: Option<Arc<Notify>>,
    ) -> Result<(), FabricError> {
        let worker_name = config.name.clone();
        info!(worker = %worker_name, "starting worker");
        worker.start().await?;
        info!(worker = %worker_name, "worker started");

        let shutdown = Arc::new(Notify::new());

        let health_shutdown = shutdown.clone();
        let health_name = worker_name.clone();
        let health_interval = config.health_interval;
        let health_handle = tokio::spawn(async move {
            Self::health_loop(&health_name, health_interval, &health_shutdown).await;
        });

        let external_shutdown = shutdown_notify.clone();
        let sig_shutdown = shutdown.clone();
        let sig_name = worker_name.clone();
        let signal_handle = tokio::spawn(async move {
            Self::wait_for_shutdown(external_shutdown).await;
            info!(worker = %sig_name, "shutdown signal received");
            sig_shutdown.notify_waiters();
        });

        shutdown.notified().await;
        health_handle.abort();
        signal_handle.abort();

        info!(worker = %worker_name, timeout = ?config.shutdown_timeout, "stopping worker");
        match tokio::time::timeout(config.shutdown_timeout, worker.stop()).await {
            Ok(Ok(())) => info!(worker = %worker_name, "worker stopped gracefully"),
            Ok(Err(e)) => warn!(worker = %worker_name, error = %e, "worker stop returned error"),
            Err(_) => warn!(worker = %worker_name, "worker stop timed out, forcing shutdown"),
        }

        info!(worker = %worker_name, "worker shutdown complete");
        Ok(())
    }

    async fn health_loop(worker_name: &str, interval: Duration, shutdown: &Notify) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!(worker = %worker_name, "health check ok");
                }
                _ = shutdown.notified() => break,
            }
        }
    }

    async fn wait_for_shutdown(external: Option<Arc<Notify>>) {
        match external {
            Some(notify) => {
                tokio::select! {
                    _ = Self::os_signal() => {}
                    _ = notify.notified() => {}
                }
            }
            None => Self::os_signal().await,
        }
    }

    async fn os_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to register SIGTERM");
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl_c");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct TestWorker {
        started: AtomicBool,
        stopped: AtomicBool,
        start_count: AtomicU32,
        stop_count: AtomicU32,
    }

    impl TestWorker {
        fn new() -> Self {
            Self {
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                start_count: AtomicU32::new(0),
                stop_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for TestWorker {
        async fn start(&self) -> Result<(), FabricError> {
            self.started.store(true, Ordering::SeqCst);
            self.start_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), FabricError> {
            self.stopped.store(true, Ordering::SeqCst);
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "test-worker"
        }
    }

    #[tokio::test]
    async fn worker_lifecycle_start_then_stop() {
        let worker = Arc::new(TestWorker::new());
        let shutdown = Arc::new(Notify::new());

        let config = WorkerBuilder::new("test-worker")
            .health_interval(Duration::from_millis(50))
            .shutdown_timeout(Duration::from_secs(1))
            .build();

        let w = worker.clone();
        let s = shutdown.clone();
        let handle = tokio::spawn(async move { WorkerRunner::run(w, config, Some(s)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(worker.started.load(Ordering::SeqCst));

        shutdown.notify_waiters();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner should complete within timeout")
            .expect("join handle should not panic");
        assert!(result.is_ok());

        assert!(worker.stopped.load(Ordering::SeqCst));
        assert_eq!(worker.start_count.load(Ordering::SeqCst), 1);
        assert_eq!(worker.stop_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_builder_defaults() {
        let config = WorkerBuilder::new("default-worker").build();
        assert_eq!(config.name, "default-worker");
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
