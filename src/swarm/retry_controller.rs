//! Between-round retry evaluation.
//!
//! A stateless policy engine: given the plan, the full execution history
//! and the prior retry attempts, it decides which failed mandatory steps
//! get another round and emits the audited `RetryDecision`/`RetryAttempt`
//! pair for each. Attempt numbering continues from the prior attempts so a
//! step's chain stays 1..N without gaps across rounds.

use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::confidence::ConfidenceService;
use crate::swarm::model::{
    AgentExecution, RetryAttempt, RetryDecision, RetryEvaluation, SwarmPlan,
};
use crate::swarm::policy::RetryContext;

/// Evaluates failed executions and decides if, when and why to retry.
#[derive(Debug, Clone, Default)]
pub struct SwarmRetryController;

impl SwarmRetryController {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Deterministic: the same history and master seed produce the same
    /// retry decisions.
    pub async fn evaluate(
        &self,
        plan: &SwarmPlan,
        executions: &[AgentExecution],
        previous_attempts: &[RetryAttempt],
        confidence: &ConfidenceService,
        run_id: &str,
        master_seed: u64,
        successful_step_ids: &HashSet<String>,
    ) -> RetryEvaluation {
        let mut evaluation = RetryEvaluation::default();

        let executed_step_ids: HashSet<&str> =
            executions.iter().map(|ex| ex.step_id.as_str()).collect();

        for step in &plan.steps {
            if successful_step_ids.contains(&step.step_id)
                || !executed_step_ids.contains(step.step_id.as_str())
            {
                continue;
            }

            let Some(latest) = executions.iter().rev().find(|ex| ex.step_id == step.step_id)
            else {
                continue;
            };

            if latest.is_successful() {
                evaluation
                    .newly_successful_step_ids
                    .insert(step.step_id.clone());
                continue;
            }

            if !step.mandatory {
                continue;
            }
            let Some(policy) = step.retry_policy.as_ref() else {
                debug!(step = %step.step_id, "failed mandatory step has no retry policy");
                continue;
            };

            let prior = previous_attempts
                .iter()
                .filter(|a| a.step_id == step.step_id)
                .count() as u32;
            let attempt = prior + 1;

            let ctx = RetryContext {
                run_id: run_id.to_string(),
                step_id: step.step_id.clone(),
                agent_id: step.agent_id.clone(),
                attempt,
                error: latest.error.clone().unwrap_or_default(),
                random_seed: master_seed.wrapping_add(u64::from(attempt)),
                last_confidence: confidence.last_confidence(&step.agent_id).await,
                domain_hints: Vec::new(),
            };

            if !policy.should_retry(&ctx) {
                debug!(step = %step.step_id, attempt, "retry budget exhausted");
                continue;
            }

            let delay = policy.next_delay(&ctx);
            evaluation.max_delay_seconds = evaluation.max_delay_seconds.max(delay);

            let attempt_id = Uuid::new_v4();
            evaluation.retry_decisions.push(RetryDecision {
                decision_id: Uuid::new_v4(),
                step_id: step.step_id.clone(),
                attempt_id,
                reason: ctx.error.clone(),
                policy_name: policy.name().to_string(),
                policy_version: policy.version().to_string(),
                policy_logic_hash: policy.logic_hash().to_string(),
            });
            evaluation.retry_attempts.push(RetryAttempt {
                attempt_id,
                step_id: step.step_id.clone(),
                attempt_number: attempt,
                delay_seconds: delay,
                reason: ctx.error,
                failed_execution_id: latest.execution_id,
            });
            evaluation.steps_to_retry.push(step.clone());
        }

        info!(
            to_retry = evaluation.steps_to_retry.len(),
            newly_successful = evaluation.newly_successful_step_ids.len(),
            "retry evaluation complete"
        );
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::swarm::model::SwarmStep;
    use crate::swarm::policy::ExponentialBackoffPolicy;
    use chrono::Utc;
    use std::sync::Arc;

    fn execution(step_id: &str, error: Option<&str>) -> AgentExecution {
        AgentExecution {
            execution_id: Uuid::new_v4(),
            agent_id: format!("{step_id}-agent"),
            agent_version: "1.0".to_string(),
            logic_hash: "h".to_string(),
            step_id: step_id.to_string(),
            input_parameters: serde_json::json!({}),
            output_evidence: Vec::new(),
            error: error.map(ToString::to_string),
            error_kind: error.map(|_| "network".to_string()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn confidence() -> ConfidenceService {
        ConfidenceService::new(Arc::new(MemoryLedger::new()))
    }

    fn plan_with(step: SwarmStep) -> SwarmPlan {
        SwarmPlan::new("triage", vec![step])
    }

    #[tokio::test]
    async fn failed_mandatory_step_is_scheduled_for_retry() {
        let step = SwarmStep::new("scanner")
            .with_step_id("scan")
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(3, 0.01, 0.1)));
        let plan = plan_with(step);
        let executions = vec![execution("scan", Some("connection refused"))];

        let eval = SwarmRetryController::new()
            .evaluate(&plan, &executions, &[], &confidence(), "run", 5, &HashSet::new())
            .await;

        assert_eq!(eval.steps_to_retry.len(), 1);
        assert_eq!(eval.retry_attempts.len(), 1);
        assert_eq!(eval.retry_decisions.len(), 1);
        assert_eq!(eval.retry_attempts[0].attempt_number, 1);
        assert_eq!(
            eval.retry_decisions[0].policy_name,
            ExponentialBackoffPolicy::NAME
        );
        assert_eq!(eval.retry_decisions[0].attempt_id, eval.retry_attempts[0].attempt_id);
        assert!(eval.max_delay_seconds > 0.0);
    }

    #[tokio::test]
    async fn successful_latest_execution_is_newly_successful() {
        let step = SwarmStep::new("scanner").with_step_id("scan");
        let plan = plan_with(step);
        let executions = vec![
            execution("scan", Some("first failure")),
            execution("scan", None),
        ];

        let eval = SwarmRetryController::new()
            .evaluate(&plan, &executions, &[], &confidence(), "run", 5, &HashSet::new())
            .await;

        assert!(eval.steps_to_retry.is_empty());
        assert!(eval.newly_successful_step_ids.contains("scan"));
    }

    #[tokio::test]
    async fn exhausted_budget_stops_retrying() {
        let step = SwarmStep::new("scanner")
            .with_step_id("scan")
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(2, 0.01, 0.1)));
        let plan = plan_with(step.clone());
        let executions = vec![execution("scan", Some("still down"))];
        let prior = vec![RetryAttempt {
            attempt_id: Uuid::new_v4(),
            step_id: "scan".to_string(),
            attempt_number: 1,
            delay_seconds: 0.01,
            reason: "down".to_string(),
            failed_execution_id: Uuid::new_v4(),
        }];

        // attempt would be 2, and the policy allows retries only while
        // attempt < 2.
        let eval = SwarmRetryController::new()
            .evaluate(&plan, &executions, &prior, &confidence(), "run", 5, &HashSet::new())
            .await;
        assert!(eval.steps_to_retry.is_empty());
        assert!(eval.retry_attempts.is_empty());
    }

    #[tokio::test]
    async fn optional_steps_are_not_retried() {
        let step = SwarmStep::new("scanner")
            .with_step_id("scan")
            .optional()
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(3, 0.01, 0.1)));
        let plan = plan_with(step);
        let executions = vec![execution("scan", Some("fail"))];

        let eval = SwarmRetryController::new()
            .evaluate(&plan, &executions, &[], &confidence(), "run", 5, &HashSet::new())
            .await;
        assert!(eval.steps_to_retry.is_empty());
    }

    #[tokio::test]
    async fn unexecuted_steps_are_ignored() {
        let step = SwarmStep::new("scanner").with_step_id("scan");
        let plan = plan_with(step);

        let eval = SwarmRetryController::new()
            .evaluate(&plan, &[], &[], &confidence(), "run", 5, &HashSet::new())
            .await;
        assert!(eval.steps_to_retry.is_empty());
        assert!(eval.newly_successful_step_ids.is_empty());
    }

    #[tokio::test]
    async fn determinism_same_seed_same_delays() {
        let step = SwarmStep::new("scanner")
            .with_step_id("scan")
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(3, 0.5, 10.0)));
        let plan = plan_with(step);
        let executions = vec![execution("scan", Some("flake"))];

        let controller = SwarmRetryController::new();
        let a = controller
            .evaluate(&plan, &executions, &[], &confidence(), "run", 77, &HashSet::new())
            .await;
        let b = controller
            .evaluate(&plan, &executions, &[], &confidence(), "run", 77, &HashSet::new())
            .await;
        assert_eq!(a.max_delay_seconds, b.max_delay_seconds);
        assert_eq!(
            a.retry_attempts[0].delay_seconds,
            b.retry_attempts[0].delay_seconds
        );
    }
}
