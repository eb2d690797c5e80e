/// Per-metric trend classification
pub mod analyzer;
/// Priority-weighted fusion across metrics
pub mod fusion;
/// Trend data model
pub mod model;

pub use analyzer::{TrendAnalyzer, TrendThresholds};
pub use fusion::fuse_trends;
pub use model::{DataPoint, MetricTrend, TrendState};
