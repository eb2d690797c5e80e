//! Deterministic decision rules.
//!
//! Rules evaluate in a fixed order and short-circuit once a firing rule
//! reaches the accept threshold. Every rule is a pure function of
//! `(cluster, trends, semantic evidence)`; rule flow is expressed with
//! result variants, never with errors.

use tracing::info;

use crate::alerts::correlation::AlertCluster;
use crate::alerts::model::Severity;
use crate::decision::model::{DecisionState, SemanticEvidence};
use crate::trend::model::{MetricTrend, TrendState};

pub const RULE_CRITICAL_DEGRADING: &str = "rule_critical_degrading";
pub const RULE_RECOVERY_DETECTED: &str = "rule_recovery_detected";
pub const RULE_INSUFFICIENT_DATA: &str = "rule_insufficient_data";
pub const RULE_HISTORICAL_CLOSE: &str = "rule_historical_close";
pub const RULE_HISTORICAL_ESCALATE: &str = "rule_historical_escalate";
pub const RULE_STABLE_METRICS: &str = "rule_stable_metrics";
pub const RULE_DEFAULT_OBSERVE: &str = "rule_default_observe";

pub const HIGH_CONFIDENCE: f64 = 0.85;
pub const MEDIUM_CONFIDENCE: f64 = 0.70;
pub const LOW_CONFIDENCE: f64 = 0.50;

/// Outcome of one rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleResult {
    pub state: Option<DecisionState>,
    pub confidence: f64,
    pub rule_id: String,
    pub justification: String,
    pub fires: bool,
}

impl RuleResult {
    fn fires(state: DecisionState, confidence: f64, rule_id: &str, justification: String) -> Self {
        Self {
            state: Some(state),
            confidence,
            rule_id: rule_id.to_string(),
            justification,
            fires: true,
        }
    }

    fn skipped(rule_id: &str, justification: &str) -> Self {
        Self {
            state: None,
            confidence: 0.0,
            rule_id: rule_id.to_string(),
            justification: justification.to_string(),
            fires: false,
        }
    }
}

/// Rule: critical cluster with a high-confidence degrading metric escalates.
fn check_critical_degrading(cluster: &AlertCluster, trends: &[MetricTrend]) -> RuleResult {
    if cluster.primary_severity != Severity::Critical {
        return RuleResult::skipped(RULE_CRITICAL_DEGRADING, "Not a critical alert");
    }

    let degrading: Vec<&str> = trends
        .iter()
        .filter(|t| t.state == TrendState::Degrading && t.confidence >= 0.7)
        .map(|t| t.metric_name.as_str())
        .collect();

    if degrading.is_empty() {
        return RuleResult::skipped(
            RULE_CRITICAL_DEGRADING,
            "Critical alert but metrics not degrading",
        );
    }

    RuleResult::fires(
        DecisionState::Escalate,
        HIGH_CONFIDENCE,
        RULE_CRITICAL_DEGRADING,
        format!(
            "Critical alert with degrading metrics: {}",
            degrading.join(", ")
        ),
    )
}

/// Rule: every metric recovering with confidence closes the incident.
fn check_recovery_detected(trends: &[MetricTrend]) -> RuleResult {
    if trends.is_empty() {
        return RuleResult::skipped(RULE_RECOVERY_DETECTED, "No metrics to analyze");
    }

    let recovering: Vec<&MetricTrend> = trends
        .iter()
        .filter(|t| t.state == TrendState::Recovering && t.confidence >= 0.6)
        .collect();

    if recovering.len() != trends.len() {
        return RuleResult::skipped(RULE_RECOVERY_DETECTED, "Not all metrics recovering");
    }

    let avg = recovering.iter().map(|t| t.confidence).sum::<f64>() / recovering.len() as f64;
    RuleResult::fires(
        DecisionState::Close,
        HIGH_CONFIDENCE.min(avg + 0.1),
        RULE_RECOVERY_DETECTED,
        format!("All {} metric(s) showing recovery", recovering.len()),
    )
}

/// Rule: missing or mostly-unknown metric data forces manual review.
fn check_insufficient_data(trends: &[MetricTrend]) -> RuleResult {
    if trends.is_empty() {
        return RuleResult::fires(
            DecisionState::ManualReview,
            MEDIUM_CONFIDENCE,
            RULE_INSUFFICIENT_DATA,
            "No metric data available for analysis".to_string(),
        );
    }

    let unknown = trends
        .iter()
        .filter(|t| t.state == TrendState::Unknown)
        .count();
    if unknown * 2 >= trends.len() {
        return RuleResult::fires(
            DecisionState::ManualReview,
            MEDIUM_CONFIDENCE,
            RULE_INSUFFICIENT_DATA,
            format!("{unknown}/{} metrics have insufficient data", trends.len()),
        );
    }

    RuleResult::skipped(RULE_INSUFFICIENT_DATA, "Sufficient metric data available")
}

/// Keyword class of a historical decision summary.
pub(crate) fn classify_summary(summary: &str) -> Option<DecisionState> {
    let lower = summary.to_lowercase();
    if ["closed", "resolved", "recovered"]
        .iter()
        .any(|w| lower.contains(w))
    {
        Some(DecisionState::Close)
    } else if ["escalated", "critical", "urgent"]
        .iter()
        .any(|w| lower.contains(w))
    {
        Some(DecisionState::Escalate)
    } else {
        None
    }
}

/// Rule: a strong historical match replays the historical outcome.
fn check_historical_patterns(evidence: &[SemanticEvidence], min_score: f64) -> RuleResult {
    let Some(best) = evidence.iter().max_by(|a, b| {
        a.similarity_score
            .partial_cmp(&b.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return RuleResult::skipped(RULE_HISTORICAL_CLOSE, "No historical evidence");
    };

    if best.similarity_score < min_score {
        return RuleResult::skipped(
            RULE_HISTORICAL_CLOSE,
            "Best match score below threshold",
        );
    }

    match classify_summary(&best.summary) {
        Some(DecisionState::Close) => RuleResult::fires(
            DecisionState::Close,
            best.similarity_score,
            RULE_HISTORICAL_CLOSE,
            format!(
                "Historical match ({:.2}): similar alert was closed",
                best.similarity_score
            ),
        ),
        Some(DecisionState::Escalate) => RuleResult::fires(
            DecisionState::Escalate,
            best.similarity_score,
            RULE_HISTORICAL_ESCALATE,
            format!(
                "Historical match ({:.2}): similar alert was escalated",
                best.similarity_score
            ),
        ),
        _ => RuleResult::fires(
            DecisionState::Observe,
            best.similarity_score * 0.8,
            RULE_HISTORICAL_CLOSE,
            format!(
                "Historical match ({:.2}): pattern unclear, recommending observation",
                best.similarity_score
            ),
        ),
    }
}

/// Rule: several stable metrics and nothing degrading keeps observing.
fn check_stable_metrics(trends: &[MetricTrend], min_stable: usize) -> RuleResult {
    if trends.is_empty() {
        return RuleResult::skipped(RULE_STABLE_METRICS, "No metrics to analyze");
    }

    if trends.iter().any(|t| t.state == TrendState::Degrading) {
        return RuleResult::skipped(RULE_STABLE_METRICS, "Some metrics are degrading");
    }

    let stable = trends
        .iter()
        .filter(|t| t.state == TrendState::Stable)
        .count();
    if stable >= min_stable {
        return RuleResult::fires(
            DecisionState::Observe,
            MEDIUM_CONFIDENCE,
            RULE_STABLE_METRICS,
            format!("{stable} metric(s) stable, continuing observation"),
        );
    }

    RuleResult::skipped(RULE_STABLE_METRICS, "Too few stable metrics")
}

/// Fallback when no deterministic rule produced a decision.
fn default_observe() -> RuleResult {
    RuleResult::fires(
        DecisionState::Observe,
        LOW_CONFIDENCE,
        RULE_DEFAULT_OBSERVE,
        "No deterministic rule matched, defaulting to observation".to_string(),
    )
}

/// Engine evaluating the rules in their fixed order.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    accept_threshold: f64,
    historical_min_score: f64,
    min_stable_count: usize,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            accept_threshold: 0.60,
            historical_min_score: 0.85,
            min_stable_count: 2,
        }
    }
}

impl RuleEngine {
    #[must_use]
    pub fn new(accept_threshold: f64) -> Self {
        Self {
            accept_threshold,
            ..Self::default()
        }
    }

    /// Evaluate every rule, returning the winner and the ordered fired ids.
    ///
    /// The winner has the highest confidence among fired rules; evaluation
    /// stops early once a firing rule reaches the accept threshold.
    #[must_use]
    pub fn evaluate(
        &self,
        cluster: &AlertCluster,
        trends: &[MetricTrend],
        semantic_evidence: &[SemanticEvidence],
    ) -> (RuleResult, Vec<String>) {
        let mut fired: Vec<String> = Vec::new();
        let mut best: Option<RuleResult> = None;

        let rules: [Box<dyn Fn() -> RuleResult + '_>; 5] = [
            Box::new(|| check_critical_degrading(cluster, trends)),
            Box::new(|| check_recovery_detected(trends)),
            Box::new(|| check_insufficient_data(trends)),
            Box::new(|| check_historical_patterns(semantic_evidence, self.historical_min_score)),
            Box::new(|| check_stable_metrics(trends, self.min_stable_count)),
        ];

        for rule in &rules {
            let result = rule();
            if !result.fires {
                continue;
            }
            fired.push(result.rule_id.clone());

            if result.state.is_some() {
                let better = best
                    .as_ref()
                    .map_or(true, |b| result.confidence > b.confidence);
                let reached_threshold = result.confidence >= self.accept_threshold;
                if better {
                    best = Some(result);
                }
                if reached_threshold {
                    break;
                }
            }
        }

        let best = match best {
            Some(result) if result.state.is_some() => result,
            _ => {
                let fallback = default_observe();
                fired.push(fallback.rule_id.clone());
                fallback
            }
        };

        info!(
            fired = fired.len(),
            winner = %best.rule_id,
            confidence = best.confidence,
            "rule evaluation complete"
        );

        (best, fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::model::{RawAlert, Severity};
    use crate::alerts::normalizer::AlertNormalizer;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn cluster(severity: &str) -> AlertCluster {
        let alert = AlertNormalizer::new().normalize(&RawAlert {
            timestamp: Utc::now() - Duration::seconds(30),
            fingerprint: "fp-1".to_string(),
            service: "api".to_string(),
            severity: severity.to_string(),
            description: "latency".to_string(),
            labels: HashMap::new(),
            source: "prometheus".to_string(),
        });
        AlertCluster::from_alerts(vec![alert], 0.9)
    }

    fn trend(name: &str, state: TrendState, confidence: f64) -> MetricTrend {
        MetricTrend {
            metric_name: name.to_string(),
            state,
            confidence,
            data_points: Vec::new(),
            lookback_seconds: 900,
            threshold_value: None,
            current_value: None,
            data_points_total: 10,
            data_points_used: 10,
            outliers_removed: 0,
            reasoning: String::new(),
            fusion_method: None,
        }
    }

    #[test]
    fn critical_degrading_escalates() {
        let engine = RuleEngine::default();
        let trends = vec![trend("cpu", TrendState::Degrading, 0.9)];
        let (winner, fired) = engine.evaluate(&cluster("critical"), &trends, &[]);
        assert_eq!(winner.state, Some(DecisionState::Escalate));
        assert_eq!(winner.confidence, HIGH_CONFIDENCE);
        assert_eq!(fired, vec![RULE_CRITICAL_DEGRADING.to_string()]);
    }

    #[test]
    fn all_recovering_closes_with_capped_confidence() {
        let engine = RuleEngine::default();
        let trends = vec![
            trend("cpu", TrendState::Recovering, 0.9),
            trend("mem", TrendState::Recovering, 0.9),
        ];
        let (winner, _) = engine.evaluate(&cluster("warning"), &trends, &[]);
        assert_eq!(winner.state, Some(DecisionState::Close));
        assert!((winner.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn empty_trends_force_manual_review() {
        let engine = RuleEngine::default();
        let (winner, fired) = engine.evaluate(&cluster("warning"), &[], &[]);
        assert_eq!(winner.state, Some(DecisionState::ManualReview));
        assert_eq!(winner.confidence, MEDIUM_CONFIDENCE);
        assert!(fired.contains(&RULE_INSUFFICIENT_DATA.to_string()));
    }

    #[test]
    fn half_unknown_forces_manual_review() {
        let engine = RuleEngine::default();
        let trends = vec![
            trend("cpu", TrendState::Unknown, 0.0),
            trend("mem", TrendState::Stable, 0.8),
        ];
        let (winner, _) = engine.evaluate(&cluster("info"), &trends, &[]);
        assert_eq!(winner.state, Some(DecisionState::ManualReview));
    }

    #[test]
    fn historical_close_keyword_follows_history() {
        let engine = RuleEngine::default();
        let trends = vec![trend("cpu", TrendState::Stable, 0.7)];
        let evidence = vec![SemanticEvidence {
            source_decision_id: "d-1".to_string(),
            similarity_score: 0.91,
            summary: "incident closed after auto-scale".to_string(),
        }];
        let (winner, fired) = engine.evaluate(&cluster("warning"), &trends, &evidence);
        assert_eq!(winner.state, Some(DecisionState::Close));
        assert!((winner.confidence - 0.91).abs() < 1e-9);
        assert!(fired.contains(&RULE_HISTORICAL_CLOSE.to_string()));
    }

    #[test]
    fn unclear_history_observes_with_reduced_confidence() {
        let engine = RuleEngine::default();
        let evidence = vec![SemanticEvidence {
            source_decision_id: "d-2".to_string(),
            similarity_score: 0.9,
            summary: "operators looked at it".to_string(),
        }];
        let trends = vec![trend("cpu", TrendState::Stable, 0.7)];
        let (winner, _) = engine.evaluate(&cluster("warning"), &trends, &evidence);
        assert_eq!(winner.state, Some(DecisionState::Observe));
        assert!((winner.confidence - 0.72).abs() < 1e-9);
    }

    #[test]
    fn stable_metrics_observe() {
        let engine = RuleEngine::default();
        let trends = vec![
            trend("cpu", TrendState::Stable, 0.7),
            trend("mem", TrendState::Stable, 0.7),
        ];
        let (winner, fired) = engine.evaluate(&cluster("info"), &trends, &[]);
        assert_eq!(winner.state, Some(DecisionState::Observe));
        assert_eq!(winner.confidence, MEDIUM_CONFIDENCE);
        assert_eq!(*fired.last().unwrap(), RULE_STABLE_METRICS.to_string());
    }

    #[test]
    fn lone_stable_metric_falls_to_default() {
        let engine = RuleEngine::default();
        let trends = vec![trend("cpu", TrendState::Stable, 0.7)];
        let (winner, fired) = engine.evaluate(&cluster("info"), &trends, &[]);
        assert_eq!(winner.rule_id, RULE_DEFAULT_OBSERVE);
        assert_eq!(winner.confidence, LOW_CONFIDENCE);
        assert_eq!(*fired.last().unwrap(), RULE_DEFAULT_OBSERVE.to_string());
    }

    #[test]
    fn winner_confidence_dominates_fired_rules() {
        let engine = RuleEngine::default();
        let trends = vec![
            trend("cpu", TrendState::Degrading, 0.9),
            trend("mem", TrendState::Stable, 0.7),
        ];
        let (winner, fired) = engine.evaluate(&cluster("critical"), &trends, &[]);
        assert!(fired.len() == 1 && winner.confidence >= HIGH_CONFIDENCE - 1e-9);
        assert_eq!(cluster("critical").primary_severity, Severity::Critical);
    }
}
