use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample of a time series. `value` is finite by construction in the
/// analyzer pipeline; non-finite inputs are stripped and counted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub is_outlier: bool,
}

impl DataPoint {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            is_outlier: false,
        }
    }
}

/// Per-metric classification over a lookback window.
///
/// Priority order (used by fusion): `Degrading > Recovering > Stable >
/// Unknown`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendState {
    Unknown,
    Stable,
    Recovering,
    Degrading,
}

impl TrendState {
    /// Integer priority: DEGRADING=3, RECOVERING=2, STABLE=1, UNKNOWN=0.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            TrendState::Degrading => 3,
            TrendState::Recovering => 2,
            TrendState::Stable => 1,
            TrendState::Unknown => 0,
        }
    }
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendState::Degrading => write!(f, "DEGRADING"),
            TrendState::Recovering => write!(f, "RECOVERING"),
            TrendState::Stable => write!(f, "STABLE"),
            TrendState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Result of trend analysis for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTrend {
    pub metric_name: String,
    pub state: TrendState,
    pub confidence: f64,
    pub data_points: Vec<DataPoint>,
    pub lookback_seconds: u64,
    pub threshold_value: Option<f64>,
    pub current_value: Option<f64>,
    pub data_points_total: usize,
    pub data_points_used: usize,
    pub outliers_removed: usize,
    /// Deterministic analysis trace; byte-stable for identical inputs.
    pub reasoning: String,
    pub fusion_method: Option<String>,
}
