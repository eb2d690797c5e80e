//! Decision composition: deterministic rules first, bounded fallback second.

use tracing::info;

use crate::alerts::correlation::AlertCluster;
use crate::decision::model::{Decision, DecisionState, LlmReason, SemanticEvidence};
use crate::decision::rules::RuleEngine;
use crate::decision::semantic::FallbackResolver;
use crate::trend::model::MetricTrend;

/// Produces governed [`Decision`]s for alert clusters.
///
/// Rules always execute before any LLM involvement; the fallback chain is
/// consulted only when the winning rule is below the threshold and did not
/// already demand manual review.
pub struct DecisionEngine {
    rule_engine: RuleEngine,
    fallback: FallbackResolver,
    llm_threshold: f64,
}

impl DecisionEngine {
    #[must_use]
    pub fn new(rule_engine: RuleEngine, fallback: FallbackResolver, llm_threshold: f64) -> Self {
        Self {
            rule_engine,
            fallback,
            llm_threshold,
        }
    }

    /// Full pipeline: rules, then the fallback chain when warranted.
    pub async fn decide(
        &self,
        cluster: &AlertCluster,
        trends: &[MetricTrend],
        semantic_evidence: Vec<SemanticEvidence>,
    ) -> Decision {
        let (mut result, fired) = self.rule_engine.evaluate(cluster, trends, &semantic_evidence);

        let mut llm_contribution = false;
        let mut llm_reason = None;

        if result.confidence < self.llm_threshold
            && result.state != Some(DecisionState::ManualReview)
        {
            if let Some(outcome) = self
                .fallback
                .resolve(cluster, trends, &semantic_evidence, &result)
                .await
            {
                llm_contribution = matches!(
                    outcome.reason,
                    LlmReason::LlmFallback | LlmReason::LlmFallbackSimulated
                );
                llm_reason = Some(outcome.reason);
                result.state = Some(outcome.state);
                result.confidence = outcome.confidence;
                result.justification = outcome.justification;
            }
        }

        let state = result.state.unwrap_or(DecisionState::ManualReview);
        let decision = Decision::from_rules(
            state,
            result.confidence,
            result.justification,
            fired,
            semantic_evidence,
            llm_contribution,
            llm_reason,
        );

        info!(
            cluster = %cluster.cluster_id,
            state = %decision.state,
            confidence = decision.confidence,
            llm = decision.llm_contribution,
            "decision produced"
        );
        decision
    }

    /// Rules-only variant for tests and offline pipelines; never consults
    /// the fallback chain.
    #[must_use]
    pub fn decide_sync(
        &self,
        cluster: &AlertCluster,
        trends: &[MetricTrend],
        semantic_evidence: Vec<SemanticEvidence>,
    ) -> Decision {
        let (result, fired) = self.rule_engine.evaluate(cluster, trends, &semantic_evidence);
        let state = result.state.unwrap_or(DecisionState::ManualReview);
        Decision::from_rules(
            state,
            result.confidence,
            result.justification,
            fired,
            semantic_evidence,
            false,
            None,
        )
    }
}
