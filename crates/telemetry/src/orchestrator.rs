//! Metrics the orchestrator process exposes: fleet-wide request state
//! rather than per-delivery throughput.

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::TelemetryError;

pub struct OrchestratorMetrics {
    registry: Registry,
    requests_active: IntGauge,
    stage_dwell: HistogramVec,
    stalled_total: IntCounter,
    terminal_total: IntCounterVec,
}

impl OrchestratorMetrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let requests_active = IntGauge::with_opts(Opts::new(
            "pipeline_requests_active",
            "Requests currently in a non-terminal stage",
        ))?;
        registry.register(Box::new(requests_active.clone()))?;

        let stage_dwell = HistogramVec::new(
            HistogramOpts::new(
                "pipeline_stage_dwell_seconds",
                "Time a request spends in each stage before advancing",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]),
            &["stage"],
        )?;
        registry.register(Box::new(stage_dwell.clone()))?;

        let stalled_total = IntCounter::with_opts(Opts::new(
            "pipeline_stalled_total",
            "Count of requests that crossed the stall threshold",
        ))?;
        registry.register(Box::new(stalled_total.clone()))?;

        let terminal_total = IntCounterVec::new(
            Opts::new("pipeline_terminal_total", "Requests that reached a terminal outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(terminal_total.clone()))?;

        Ok(Self {
            registry,
            requests_active,
            stage_dwell,
            stalled_total,
            terminal_total,
        })
    }

    pub fn set_active_requests(&self, count: i64) {
        self.requests_active.set(count);
    }

    pub fn observe_stage_dwell_seconds(&self, stage: &str, seconds: f64) {
        self.stage_dwell.with_label_values(&[stage]).observe(seconds);
    }

    pub fn record_stalled(&self) {
        self.stalled_total.inc();
    }

    pub fn record_terminal(&self, outcome: &str) {
        self.terminal_total.with_label_values(&[outcome]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn render(&self) -> Result<String, TelemetryError> {
        crate::render(&self.registry)
    }
}
