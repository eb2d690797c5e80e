use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::swarm::model::{Evidence, HumanDecision};

/// Terminal recommendation for an alert cluster or swarm run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    Close,
    Observe,
    Escalate,
    ManualReview,
}

impl DecisionState {
    /// Parse the wire form used in LLM replies and persisted records.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "CLOSE" => Some(DecisionState::Close),
            "OBSERVE" => Some(DecisionState::Observe),
            "ESCALATE" => Some(DecisionState::Escalate),
            "MANUAL_REVIEW" => Some(DecisionState::ManualReview),
            _ => None,
        }
    }

    /// Default proposed action for this state.
    #[must_use]
    pub fn default_action(self) -> &'static str {
        match self {
            DecisionState::Close => "close",
            DecisionState::Observe => "observe",
            DecisionState::Escalate => "escalate",
            DecisionState::ManualReview => "manual_review",
        }
    }
}

impl std::fmt::Display for DecisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionState::Close => write!(f, "CLOSE"),
            DecisionState::Observe => write!(f, "OBSERVE"),
            DecisionState::Escalate => write!(f, "ESCALATE"),
            DecisionState::ManualReview => write!(f, "MANUAL_REVIEW"),
        }
    }
}

/// Historical precedent retrieved from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEvidence {
    pub source_decision_id: String,
    pub similarity_score: f64,
    pub summary: String,
}

/// How the fallback chain contributed to a decision, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmReason {
    SemanticRecovery,
    LlmFallback,
    LlmFallbackSimulated,
}

/// A governed decision with its full audit trail.
///
/// One model family serves both pipelines: rule decisions fill
/// `rules_applied`/`semantic_evidence`, swarm decisions fill
/// `supporting_evidence`/`metadata`. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub state: DecisionState,
    pub confidence: f64,
    pub justification: String,
    /// Operational action proposed to the operator or automation layer.
    pub action_proposed: String,
    /// Every rule id that fired, in evaluation order.
    pub rules_applied: Vec<String>,
    pub semantic_evidence: Vec<SemanticEvidence>,
    pub llm_contribution: bool,
    pub llm_reason: Option<LlmReason>,
    pub supporting_evidence: Vec<Evidence>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub human_decision: Option<HumanDecision>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Decision produced by the rule/fallback pipeline.
    #[must_use]
    pub fn from_rules(
        state: DecisionState,
        confidence: f64,
        justification: String,
        rules_applied: Vec<String>,
        semantic_evidence: Vec<SemanticEvidence>,
        llm_contribution: bool,
        llm_reason: Option<LlmReason>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            state,
            confidence: confidence.clamp(0.0, 1.0),
            justification,
            action_proposed: state.default_action().to_string(),
            rules_applied,
            semantic_evidence,
            llm_contribution,
            llm_reason,
            supporting_evidence: Vec::new(),
            metadata: HashMap::new(),
            human_decision: None,
            created_at: Utc::now(),
        }
    }

    /// Decision produced by the swarm evidence aggregation.
    #[must_use]
    pub fn from_swarm(
        state: DecisionState,
        action_proposed: String,
        confidence: f64,
        justification: String,
        supporting_evidence: Vec<Evidence>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            state,
            confidence: confidence.clamp(0.0, 1.0),
            justification,
            action_proposed,
            rules_applied: Vec::new(),
            semantic_evidence: Vec::new(),
            llm_contribution: false,
            llm_reason: None,
            supporting_evidence,
            metadata,
            human_decision: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_wire_form() {
        for state in [
            DecisionState::Close,
            DecisionState::Observe,
            DecisionState::Escalate,
            DecisionState::ManualReview,
        ] {
            assert_eq!(DecisionState::parse(&state.to_string()), Some(state));
        }
        assert_eq!(DecisionState::parse("PANIC"), None);
    }

    #[test]
    fn rule_decision_confidence_is_clamped() {
        let decision = Decision::from_rules(
            DecisionState::Close,
            1.7,
            "test".to_string(),
            vec![],
            vec![],
            false,
            None,
        );
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.action_proposed, "close");
    }
}
