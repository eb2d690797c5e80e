//! Deterministic replay of persisted runs.
//!
//! Reconstructs a past run from its full ledger context and drives the
//! coordinator in replay mode: historical executions stand in for live
//! agents, the original master seed drives every policy evaluation, and
//! the replayed decision is compared causally against the original.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::AuditLedger;
use crate::swarm::coordinator::SwarmRunCoordinator;
use crate::swarm::model::{AgentExecution, ReplayReport, SwarmPlan};
use crate::swarm::policy::DefaultConfidencePolicy;
use crate::utils::error::{TriageError, TriageResult};

/// Replays persisted runs for audit and what-if policy evaluation.
pub struct ReplayEngine {
    ledger: Arc<dyn AuditLedger>,
}

impl ReplayEngine {
    #[must_use]
    pub fn new(ledger: Arc<dyn AuditLedger>) -> Self {
        Self { ledger }
    }

    /// Replay a run, optionally under a new plan, and report divergences.
    ///
    /// For an unchanged plan and policies the report must show zero
    /// divergences and a zero confidence delta.
    pub async fn replay(
        &self,
        run_id: &str,
        coordinator: &SwarmRunCoordinator,
        new_plan: Option<SwarmPlan>,
    ) -> TriageResult<ReplayReport> {
        let context = self.ledger.fetch_full_run_context(run_id).await?;

        let original_decision =
            context
                .run
                .final_decision
                .clone()
                .ok_or_else(|| TriageError::Ledger {
                    reason: format!("run {run_id} has no persisted decision"),
                })?;

        // Final historical execution per step; earlier failed attempts are
        // re-derived by the retry policies, not re-played.
        let mut replay_results: HashMap<String, AgentExecution> = HashMap::new();
        for execution in &context.run.executions {
            replay_results.insert(execution.step_id.clone(), execution.clone());
        }

        let plan = new_plan.unwrap_or_else(|| context.run.plan.clone());

        let outcome = coordinator
            .execute(
                context.run.domain.clone(),
                plan,
                context.alert.clone(),
                run_id.to_string(),
                &DefaultConfidencePolicy::default(),
                None,
                Some(context.master_seed),
                Some(&replay_results),
            )
            .await?;

        let replayed_decision =
            outcome
                .run
                .final_decision
                .clone()
                .ok_or_else(|| TriageError::Fatal {
                    reason: "replay produced no decision".to_string(),
                })?;

        let mut divergences = Vec::new();

        let original_evidence: std::collections::HashSet<Uuid> = original_decision
            .supporting_evidence
            .iter()
            .map(|ev| ev.evidence_id)
            .collect();
        let replayed_evidence: std::collections::HashSet<Uuid> = replayed_decision
            .supporting_evidence
            .iter()
            .map(|ev| ev.evidence_id)
            .collect();
        if original_evidence != replayed_evidence {
            divergences.push(format!(
                "evidence set mismatch: original {} item(s), replayed {} item(s)",
                original_evidence.len(),
                replayed_evidence.len()
            ));
        }

        if replayed_decision.action_proposed != original_decision.action_proposed {
            divergences.push(format!(
                "final action mismatch: original {}, replayed {}",
                original_decision.action_proposed, replayed_decision.action_proposed
            ));
        }

        let report = ReplayReport {
            report_id: Uuid::new_v4(),
            original_decision_id: original_decision.decision_id,
            replayed_decision_id: replayed_decision.decision_id,
            causal_divergences: divergences,
            confidence_delta: replayed_decision.confidence - original_decision.confidence,
            timestamp: chrono::Utc::now(),
        };

        if report.causal_divergences.is_empty() {
            info!(run_id, "replay matched original run");
        } else {
            warn!(
                run_id,
                divergences = report.causal_divergences.len(),
                "replay diverged from original run"
            );
        }

        self.ledger.save_replay_report(&report).await?;
        Ok(report)
    }
}
