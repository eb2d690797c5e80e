//! Evidence aggregation and human governance.
//!
//! Transforms the evidence of successful executions into a final decision.
//! An LLM hypothesis, when present, dominates the proposal; otherwise mean
//! evidence confidence gates auto-remediation. A registered human hook may
//! accept, reject or override; overrides penalize every agent that
//! contributed evidence.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::confidence::ConfidenceService;
use crate::decision::model::{Decision, DecisionState};
use crate::swarm::model::{
    AgentExecution, Evidence, EvidenceKind, HumanAction, HumanDecision, TriggerAlert,
};
use crate::swarm::policy::ConfidencePolicy;

/// Hook invoked with the provisional decision; `None` leaves it pending.
pub type HumanHook = Arc<dyn Fn(&Decision) -> Option<HumanDecision> + Send + Sync>;

/// Threshold above which aggregated evidence proposes auto-remediation.
const AUTO_REMEDIATE_THRESHOLD: f64 = 0.8;

/// Stateless governance engine turning evidence into a decision.
#[derive(Default)]
pub struct SwarmDecisionController;

impl SwarmDecisionController {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub async fn decide(
        &self,
        successful_executions: &[AgentExecution],
        _alert: &TriggerAlert,
        confidence: &ConfidenceService,
        policy: &dyn ConfidencePolicy,
        human_hook: Option<&HumanHook>,
    ) -> Decision {
        let decision = formulate(successful_executions);
        self.request_human_review(decision, human_hook, confidence, policy)
            .await
    }

    async fn request_human_review(
        &self,
        mut decision: Decision,
        human_hook: Option<&HumanHook>,
        confidence: &ConfidenceService,
        policy: &dyn ConfidencePolicy,
    ) -> Decision {
        let Some(hook) = human_hook else {
            return decision;
        };

        let human_decision = hook(&decision);
        decision.human_decision = human_decision.clone();

        if let Some(human) = human_decision {
            if human.action == HumanAction::Override {
                let mut penalized: Vec<&str> = decision
                    .supporting_evidence
                    .iter()
                    .map(|ev| ev.agent_id.as_str())
                    .collect();
                penalized.sort_unstable();
                penalized.dedup();

                let decision_id = decision.decision_id.to_string();
                for agent_id in penalized {
                    if let Err(err) = confidence
                        .penalize_for_override(agent_id, &decision_id, policy)
                        .await
                    {
                        warn!(agent_id, error = %err, "override penalty failed");
                    }
                }
                info!(decision_id = %decision.decision_id, "human override applied");
            }
        }

        decision
    }
}

/// Aggregate evidence into a provisional decision.
fn formulate(successful_executions: &[AgentExecution]) -> Decision {
    let all_evidence: Vec<Evidence> = successful_executions
        .iter()
        .flat_map(|ex| ex.output_evidence.iter().cloned())
        .collect();

    if all_evidence.is_empty() {
        return Decision::from_swarm(
            DecisionState::ManualReview,
            "manual_review".to_string(),
            0.0,
            "No evidence produced.".to_string(),
            Vec::new(),
            HashMap::new(),
        );
    }

    let avg_confidence =
        all_evidence.iter().map(|ev| ev.confidence).sum::<f64>() / all_evidence.len() as f64;
    let summary = all_evidence
        .iter()
        .map(|ev| ev.content.to_string())
        .collect::<Vec<_>>()
        .join("; ");

    // The most recent hypothesis evidence (LLM-produced) takes precedence
    // over plain aggregation.
    if let Some(hypothesis) = all_evidence
        .iter()
        .rev()
        .find(|ev| ev.kind == EvidenceKind::Hypothesis)
    {
        let root_cause = hypothesis
            .content
            .get("root_cause")
            .and_then(|v| v.as_str())
            .unwrap_or("LLM fallback analysis")
            .to_string();
        let procedure = hypothesis
            .content
            .get("recommended_procedure")
            .and_then(|v| v.as_str())
            .unwrap_or("manual_review")
            .to_string();

        let mut metadata = HashMap::new();
        metadata.insert("llm_enriched".to_string(), serde_json::json!(true));
        metadata.insert("llm_procedure".to_string(), serde_json::json!(procedure));

        return Decision::from_swarm(
            DecisionState::ManualReview,
            "human_review_required".to_string(),
            avg_confidence,
            format!(
                "LLM-enriched analysis: {root_cause}; suggested procedure: {procedure}; \
                 evidence={summary}"
            ),
            all_evidence,
            metadata,
        );
    }

    let mut metadata = HashMap::new();
    metadata.insert("aggregated".to_string(), serde_json::json!(true));
    metadata.insert(
        "evidence_count".to_string(),
        serde_json::json!(all_evidence.len()),
    );

    let (state, action) = if avg_confidence > AUTO_REMEDIATE_THRESHOLD {
        (DecisionState::Close, "auto_remediate")
    } else {
        (DecisionState::ManualReview, "human_review_required")
    };

    Decision::from_swarm(
        state,
        action.to_string(),
        avg_confidence,
        format!("Aggregated Evidence: {summary}"),
        all_evidence,
        metadata,
    )
}
