//! Prometheus metrics for the triage service.
//!
//! Counters and histograms for swarm executions, decisions, dedup verdicts
//! and webhook traffic, exposed as text on `GET /metrics`. The registry is
//! owned by the service instance and handed to components explicitly.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Owns the metric families and their registry.
pub struct MetricsService {
    registry: Registry,
    executions: HistogramVec,
    decisions: CounterVec,
    decision_confidence: HistogramVec,
    dedup: CounterVec,
    webhook_requests: CounterVec,
}

impl MetricsService {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let executions = HistogramVec::new(
            HistogramOpts::new(
                "triage_swarm_run_duration_seconds",
                "Wall-clock duration of swarm runs",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
            &["domain", "severity"],
        )
        .expect("valid histogram spec");

        let decisions = CounterVec::new(
            Opts::new("triage_decisions_total", "Decisions by proposed state"),
            &["state"],
        )
        .expect("valid counter spec");

        let decision_confidence = HistogramVec::new(
            HistogramOpts::new(
                "triage_decision_confidence",
                "Confidence distribution of decisions",
            )
            .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
            &["state"],
        )
        .expect("valid histogram spec");

        let dedup = CounterVec::new(
            Opts::new("triage_dedup_total", "Deduplication verdicts"),
            &["action"],
        )
        .expect("valid counter spec");

        let webhook_requests = CounterVec::new(
            Opts::new("triage_webhook_requests_total", "Webhook deliveries by status"),
            &["status"],
        )
        .expect("valid counter spec");

        for collector in [
            Box::new(executions.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(decisions.clone()),
            Box::new(decision_confidence.clone()),
            Box::new(dedup.clone()),
            Box::new(webhook_requests.clone()),
        ] {
            if let Err(err) = registry.register(collector) {
                warn!(error = %err, "metric registration failed");
            }
        }

        Self {
            registry,
            executions,
            decisions,
            decision_confidence,
            dedup,
            webhook_requests,
        }
    }

    pub fn record_execution(&self, duration_seconds: f64, domain: &str, severity: &str) {
        self.executions
            .with_label_values(&[domain, severity])
            .observe(duration_seconds);
    }

    pub fn record_decision(&self, confidence: f64, state: &str) {
        self.decisions.with_label_values(&[state]).inc();
        self.decision_confidence
            .with_label_values(&[state])
            .observe(confidence);
    }

    pub fn record_dedup(&self, action: &str) {
        self.dedup.with_label_values(&[action]).inc();
    }

    pub fn record_webhook(&self, status: &str) {
        self.webhook_requests.with_label_values(&[status]).inc();
    }

    /// Render the registry in Prometheus text exposition format.
    #[must_use]
    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
            warn!(error = %err, "metric encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}
