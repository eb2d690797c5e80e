/// Prometheus metrics collection and exposition
pub mod metrics;

pub use metrics::MetricsService;
