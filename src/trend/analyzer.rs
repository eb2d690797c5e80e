//! Per-metric trend classification.
//!
//! Pipeline: strip non-finite values, p95 outlier filtering, relative-change
//! classification, tiered confidence from regression fit quality. The
//! reasoning trace is deterministic and pinned by tests.

use tracing::{debug, warn};

use crate::trend::model::{DataPoint, MetricTrend, TrendState};
use crate::utils::stats::{coef_variation, filter_outliers_p95, linear_trend, validate_series};

/// Thresholds for relative-change classification.
#[derive(Debug, Clone)]
pub struct TrendThresholds {
    /// Relative increase over the window classified as DEGRADING.
    pub degrading: f64,
    /// Relative decrease over the window classified as RECOVERING.
    pub recovering: f64,
    pub lookback_seconds: u64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            degrading: 0.15,
            recovering: 0.10,
            lookback_seconds: 15 * 60,
        }
    }
}

/// Analyzes time-series data to determine trend state.
#[derive(Debug, Clone, Default)]
pub struct TrendAnalyzer {
    thresholds: TrendThresholds,
}

impl TrendAnalyzer {
    #[must_use]
    pub fn new(thresholds: TrendThresholds) -> Self {
        Self { thresholds }
    }

    /// Analyze a metric's data points (timestamp-ordered).
    #[must_use]
    pub fn analyze(
        &self,
        metric_name: &str,
        data_points: &[DataPoint],
        threshold_value: Option<f64>,
    ) -> MetricTrend {
        let raw_values: Vec<f64> = data_points.iter().map(|dp| dp.value).collect();
        let cleaned = validate_series(&raw_values);
        if cleaned.removed > 0 {
            warn!(
                metric = metric_name,
                removed = cleaned.removed,
                "stripped non-finite values from series"
            );
        }

        if cleaned.values.len() < 5 {
            debug!(
                metric = metric_name,
                valid = cleaned.values.len(),
                "insufficient data for trend analysis"
            );
            return MetricTrend {
                metric_name: metric_name.to_string(),
                state: TrendState::Unknown,
                confidence: 0.0,
                data_points: data_points.to_vec(),
                lookback_seconds: self.thresholds.lookback_seconds,
                threshold_value,
                current_value: data_points.last().map(|dp| dp.value),
                data_points_total: data_points.len(),
                data_points_used: 0,
                outliers_removed: 0,
                reasoning: "insufficient data (<5 valid)".to_string(),
                fusion_method: None,
            };
        }

        // Sets of exactly 5 skip outlier filtering; removing a point would
        // drop the set below the analyzable minimum.
        let (filtered, outliers) = if cleaned.values.len() <= 5 {
            (cleaned.values.clone(), Vec::new())
        } else {
            filter_outliers_p95(&cleaned.values)
        };

        let marked = mark_outliers(data_points, &outliers);
        let (state, confidence, reasoning) =
            self.classify(&filtered, cleaned.values.len());

        MetricTrend {
            metric_name: metric_name.to_string(),
            state,
            confidence,
            current_value: marked.last().map(|dp| dp.value),
            data_points: marked,
            lookback_seconds: self.thresholds.lookback_seconds,
            threshold_value,
            data_points_total: data_points.len(),
            data_points_used: filtered.len(),
            outliers_removed: outliers.len(),
            reasoning,
            fusion_method: None,
        }
    }

    /// Classify filtered values and score confidence.
    fn classify(&self, values: &[f64], total_valid: usize) -> (TrendState, f64, String) {
        let first = values[0];
        let last = values[values.len() - 1];

        let percent_change = if first != 0.0 {
            (last - first) / first.abs()
        } else if last > 0.0 {
            self.thresholds.degrading + 1.0
        } else if last < 0.0 {
            -(self.thresholds.recovering + 1.0)
        } else {
            0.0
        };

        let (state, direction) = if percent_change > self.thresholds.degrading {
            (TrendState::Degrading, "increasing")
        } else if percent_change < -self.thresholds.recovering {
            (TrendState::Recovering, "decreasing")
        } else {
            (TrendState::Stable, "stable")
        };

        let (slope, r_squared) = linear_trend(values);
        let cv = coef_variation(values);

        let (mut confidence, data_quality) = if values.len() >= 10 {
            ((r_squared + 0.15).min(0.95), "high (≥10 points)")
        } else {
            (r_squared.min(0.70), "medium (5-9 points)")
        };

        let variance_note = if cv > 0.5 {
            confidence *= 0.85;
            " (high variance penalty applied)"
        } else {
            ""
        };

        // Stable series with low spread are trustworthy even when the flat
        // regression fit gives a poor r².
        if state == TrendState::Stable {
            let floor = if values.len() >= 10 {
                (0.6 + (1.0 - cv.min(1.0)) * 0.3).min(0.95)
            } else {
                (0.5 + (1.0 - cv.min(1.0)) * 0.2).min(0.75)
            };
            confidence = confidence.max(floor);
        }

        let reasoning = format!(
            "Trend: {direction} (slope={slope:.4}). \
             Confidence: {confidence:.2} (R²={r_squared:.2}, data_quality={data_quality}, \
             cv={cv:.2}{variance_note}). \
             Thresholds: degrading={}, recovering={}. \
             Points: {} used from {} valid.",
            self.thresholds.degrading,
            self.thresholds.recovering,
            values.len(),
            total_valid,
        );

        (state, confidence, reasoning)
    }

    /// Analyze several metrics at once, preserving input order.
    #[must_use]
    pub fn analyze_many(
        &self,
        metrics: &[(String, Vec<DataPoint>)],
    ) -> Vec<MetricTrend> {
        metrics
            .iter()
            .map(|(name, points)| self.analyze(name, points, None))
            .collect()
    }
}

fn mark_outliers(data_points: &[DataPoint], outlier_values: &[f64]) -> Vec<DataPoint> {
    data_points
        .iter()
        .map(|dp| DataPoint {
            timestamp: dp.timestamp,
            value: dp.value,
            is_outlier: outlier_values.contains(&dp.value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn points(values: &[f64]) -> Vec<DataPoint> {
        let base = Utc::now() - Duration::minutes(15);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DataPoint::new(base + Duration::seconds(30 * i as i64), *v))
            .collect()
    }

    #[test]
    fn too_few_points_is_unknown_with_zero_confidence() {
        let analyzer = TrendAnalyzer::default();
        let trend = analyzer.analyze("cpu", &points(&[1.0, 2.0, 3.0]), None);
        assert_eq!(trend.state, TrendState::Unknown);
        assert_eq!(trend.confidence, 0.0);
        assert_eq!(trend.reasoning, "insufficient data (<5 valid)");
        assert_eq!(trend.data_points_used, 0);
    }

    #[test]
    fn non_finite_values_do_not_count_as_valid() {
        let analyzer = TrendAnalyzer::default();
        let trend = analyzer.analyze(
            "cpu",
            &points(&[1.0, f64::NAN, 2.0, f64::INFINITY, 3.0, 4.0]),
            None,
        );
        assert_eq!(trend.state, TrendState::Unknown);
    }

    #[test]
    fn rising_series_is_degrading() {
        let analyzer = TrendAnalyzer::default();
        let values = [80.0, 82.0, 85.0, 88.0, 92.0, 95.0, 97.0, 98.0, 98.0, 99.0];
        let trend = analyzer.analyze("cpu_usage", &points(&values), None);
        assert_eq!(trend.state, TrendState::Degrading);
        // p95 removes the top sample, leaving 9 points in the medium tier.
        assert_eq!(trend.data_points_used, 9);
        assert_eq!(trend.outliers_removed, 1);
        assert!((trend.confidence - 0.70).abs() < 1e-9);
        assert!(trend.reasoning.contains("increasing"));
        assert!(trend.reasoning.contains("medium (5-9 points)"));
    }

    #[test]
    fn falling_series_is_recovering() {
        let analyzer = TrendAnalyzer::default();
        let values = [100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 70.0, 65.0, 60.0, 55.0];
        let trend = analyzer.analyze("latency", &points(&values), None);
        assert_eq!(trend.state, TrendState::Recovering);
        assert!(trend.confidence >= 0.7);
        assert!(trend.reasoning.contains("decreasing"));
    }

    #[test]
    fn noisy_flat_series_is_stable_with_floor() {
        let analyzer = TrendAnalyzer::default();
        let values = [10.0, 11.0, 9.0, 12.0, 8.0, 13.0, 7.0, 14.0, 9.0, 11.0];
        let trend = analyzer.analyze("requests", &points(&values), None);
        assert_eq!(trend.state, TrendState::Stable);
        // 9 points after filtering; floor = 0.5 + (1-cv)*0.2 capped at 0.75.
        assert!(trend.confidence > 0.5 && trend.confidence <= 0.75);
    }

    #[test]
    fn exactly_five_points_skip_outlier_filter() {
        let analyzer = TrendAnalyzer::default();
        let trend = analyzer.analyze("mem", &points(&[10.0, 10.0, 10.0, 10.0, 100.0]), None);
        assert_eq!(trend.data_points_used, 5);
        assert_eq!(trend.outliers_removed, 0);
    }

    #[test]
    fn reasoning_is_byte_stable() {
        let analyzer = TrendAnalyzer::default();
        let values = [80.0, 82.0, 85.0, 88.0, 92.0, 95.0, 97.0, 98.0, 98.0, 99.0];
        let a = analyzer.analyze("cpu", &points(&values), None);
        let b = analyzer.analyze("cpu", &points(&values), None);
        assert_eq!(a.reasoning, b.reasoning);
        assert_eq!(a.state, b.state);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn zero_first_value_uses_sign_of_last() {
        let analyzer = TrendAnalyzer::default();
        let trend = analyzer.analyze("errors", &points(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]), None);
        assert_eq!(trend.state, TrendState::Degrading);
    }

    #[test]
    fn outlier_flags_land_on_marked_points() {
        let analyzer = TrendAnalyzer::default();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 100.0];
        let trend = analyzer.analyze("io", &points(&values), None);
        let flagged: Vec<f64> = trend
            .data_points
            .iter()
            .filter(|dp| dp.is_outlier)
            .map(|dp| dp.value)
            .collect();
        assert_eq!(flagged, vec![100.0]);
        assert!(trend.data_points_used + trend.outliers_removed <= trend.data_points_total);
    }
}
