//! Metrics the ingress gateway exposes for its own HTTP surface, separate
//! from the pipeline's internal stage/orchestrator series.

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

use crate::error::TelemetryError;

pub struct GatewayMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    ingress_bytes_total: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests served by the gateway"),
            &["route", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Gateway request handling latency")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["route"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let ingress_bytes_total = IntCounter::with_opts(Opts::new(
            "ingress_bytes_total",
            "Bytes accepted across submission and archive upload routes",
        ))?;
        registry.register(Box::new(ingress_bytes_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            ingress_bytes_total,
        })
    }

    pub fn record_request(&self, route: &str, status: u16) {
        self.requests_total.with_label_values(&[route, &status.to_string()]).inc();
    }

    pub fn observe_duration_seconds(&self, route: &str, seconds: f64) {
        self.request_duration.with_label_values(&[route]).observe(seconds);
    }

    pub fn record_ingress_bytes(&self, bytes: u64) {
        self.ingress_bytes_total.inc_by(bytes);
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
        let metrics = GatewayMetrics::new().expect("construct metrics");
        metrics.record_request("/submit", 202);
        metrics.observe_duration_seconds("/submit", 0.042);
        metrics.record_ingress_bytes(4096);

        let rendered = metrics.render().expect("render text format");
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("http_request_duration_seconds"));
        assert!(rendered.contains("ingress_bytes_total"));
        assert!(rendered.contains("route=\"/submit\""));
        assert!(rendered.contains("status=\"202\""));
    }
}
