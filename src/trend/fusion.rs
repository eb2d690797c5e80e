//! Priority-weighted fusion of per-metric trends.
//!
//! A cluster usually has several analyzed metrics; fusion collapses them to
//! one state. The worst state wins (DEGRADING > RECOVERING > STABLE >
//! UNKNOWN) and confidences are blended 70/30 between metrics that agree
//! with the fused state and those that do not.

use crate::trend::model::TrendState;

const MATCHING_WEIGHT: f64 = 0.7;
const OTHER_WEIGHT: f64 = 0.3;

/// Fuse `(state, confidence)` pairs into a single classification.
///
/// Empty input fuses to `(Unknown, 0.0)`. When only one side (matching or
/// non-matching) is present its weight renormalizes to 1.0.
#[must_use]
pub fn fuse_trends(trends: &[(TrendState, f64)]) -> (TrendState, f64) {
    let Some(fused_state) = trends.iter().map(|(state, _)| *state).max() else {
        return (TrendState::Unknown, 0.0);
    };

    let matching: Vec<f64> = trends
        .iter()
        .filter(|(state, _)| *state == fused_state)
        .map(|(_, conf)| *conf)
        .collect();
    let other: Vec<f64> = trends
        .iter()
        .filter(|(state, _)| *state != fused_state)
        .map(|(_, conf)| *conf)
        .collect();

    let avg = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;

    let (matching_avg, matching_weight) = if matching.is_empty() {
        (0.0, 0.0)
    } else {
        (avg(&matching), MATCHING_WEIGHT)
    };
    let (other_avg, other_weight) = if other.is_empty() {
        (0.0, 0.0)
    } else {
        (avg(&other), OTHER_WEIGHT)
    };

    let total_weight = matching_weight + other_weight;
    let confidence = if total_weight > 0.0 {
        matching_avg * (matching_weight / total_weight) + other_avg * (other_weight / total_weight)
    } else {
        0.0
    };

    (fused_state, confidence.clamp(0.0, 1.0))
}
