//! Metrics a single stage worker process exposes on its own `/metrics`
//! route: throughput, failure classification, latency, in-flight work, and
//! requeue volume.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::TelemetryError;

pub struct StageMetrics {
    registry: Registry,
    messages_in: IntCounter,
    messages_out: IntCounter,
    errors: IntCounterVec,
    duration: Histogram,
    active_tasks: IntGauge,
    redeliveries: IntCounter,
}

impl StageMetrics {
    pub fn new(stage: &str) -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let messages_in = IntCounter::with_opts(
            Opts::new("stage_messages_in_total", "Envelopes consumed by this stage")
                .const_label("stage", stage),
        )?;
        registry.register(Box::new(messages_in.clone()))?;

        let messages_out = IntCounter::with_opts(
            Opts::new("stage_messages_out_total", "Envelopes published by this stage")
                .const_label("stage", stage),
        )?;
        registry.register(Box::new(messages_out.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new("stage_errors_total", "Transform failures, split by retry classification")
                .const_label("stage", stage),
            &["retryable"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new("stage_duration_seconds", "Time spent inside the stage transform")
                .const_label("stage", stage)
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        let active_tasks = IntGauge::with_opts(
            Opts::new("stage_active_tasks", "Deliveries currently being processed")
                .const_label("stage", stage),
        )?;
        registry.register(Box::new(active_tasks.clone()))?;

        let redeliveries = IntCounter::with_opts(
            Opts::new("stage_redeliveries_total", "Deliveries nacked with requeue")
                .const_label("stage", stage),
        )?;
        registry.register(Box::new(redeliveries.clone()))?;

        Ok(Self {
            registry,
            messages_in,
            messages_out,
            errors,
            duration,
            active_tasks,
            redeliveries,
        })
    }

    pub fn record_in(&self) {
        self.messages_in.inc();
    }

    pub fn record_out(&self) {
        self.messages_out.inc();
    }

    pub fn record_error(&self, retryable: bool) {
        let label = if retryable { "true" } else { "false" };
        self.errors.with_label_values(&[label]).inc();
    }

    pub fn observe_duration_seconds(&self, seconds: f64) {
        self.duration.observe(seconds);
    }

    pub fn task_started(&self) {
        self.active_tasks.inc();
    }

    pub fn task_finished(&self) {
        self.active_tasks.dec();
    }

    pub fn record_redelivery(&self) {
        self.redeliveries.inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn render(&self) -> Result<String, TelemetryError> {
        crate::render(&self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders_all_series() {
        let metrics = StageMetrics::new("analysis").expect("construct metrics");
        metrics.record_in();
        metrics.record_out();
        metrics.record_error(true);
        metrics.record_error(false);
        metrics.observe_duration_seconds(1.25);
        metrics.task_started();
        metrics.record_redelivery();

        let rendered = metrics.render().expect("render text format");
        assert!(rendered.contains("stage_messages_in_total"));
        assert!(rendered.contains("stage_messages_out_total"));
        assert!(rendered.contains("stage_errors_total"));
        assert!(rendered.contains("stage_duration_seconds"));
        assert!(rendered.contains("stage_active_tasks"));
        assert!(rendered.contains("stage_redeliveries_total"));
        assert!(rendered.contains("stage=\"analysis\""));
    }

    #[test]
    fn active_tasks_gauge_tracks_in_flight_work() {
        let metrics = StageMetrics::new("planning").expect("construct metrics");
        metrics.task_started();
        metrics.task_started();
        metrics.task_finished();
        assert_eq!(metrics.active_tasks.get(), 1);
    }
}
