//! Parallel swarm step execution.
//!
//! The pure execution engine: runs a set of steps concurrently, each under
//! its own deadline, applying the step's retry policy on failure. Every
//! execution and every retry attempt is returned so the audit trail shows
//! the full chain, not just the last outcome.

use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::swarm::agent::AgentRegistry;
use crate::swarm::model::{AgentExecution, Evidence, RetryAttempt, SwarmStep};
use crate::swarm::policy::RetryContext;
use crate::utils::error::TriageError;

/// Per-step hints carried into retry contexts.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub last_confidence: f64,
    pub domain_hints: Vec<String>,
}

/// Result of one orchestrator round.
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub executions: Vec<AgentExecution>,
    pub retry_attempts: Vec<RetryAttempt>,
}

/// Executes swarm steps in parallel with per-step deadlines and retries.
pub struct SwarmOrchestrator {
    registry: Arc<AgentRegistry>,
    step_deadline: Duration,
}

impl SwarmOrchestrator {
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, step_deadline: Duration) -> Self {
        Self {
            registry,
            step_deadline,
        }
    }

    /// Execute all steps concurrently. Within a step the retry chain is
    /// strictly sequential and attempts are numbered from 1; across steps
    /// nothing is ordered.
    pub async fn execute_swarm(
        &self,
        steps: &[SwarmStep],
        run_id: &str,
        master_seed: u64,
        contexts: &HashMap<String, StepContext>,
    ) -> RoundOutcome {
        if steps.is_empty() {
            return RoundOutcome::default();
        }

        let futures: Vec<_> = steps
            .iter()
            .map(|step| {
                let context = contexts.get(&step.step_id).cloned().unwrap_or_default();
                self.execute_step_with_retries(step.clone(), run_id.to_string(), master_seed, context)
            })
            .collect();

        let results = join_all(futures).await;

        let mut outcome = RoundOutcome::default();
        for (executions, attempts) in results {
            outcome.executions.extend(executions);
            outcome.retry_attempts.extend(attempts);
        }

        info!(
            steps = steps.len(),
            executions = outcome.executions.len(),
            retries = outcome.retry_attempts.len(),
            "orchestrator round complete"
        );
        outcome
    }

    /// One step's attempt chain, driven by its retry policy.
    async fn execute_step_with_retries(
        &self,
        step: SwarmStep,
        run_id: String,
        master_seed: u64,
        context: StepContext,
    ) -> (Vec<AgentExecution>, Vec<RetryAttempt>) {
        let mut executions = Vec::new();
        let mut attempts = Vec::new();
        let mut attempt_number: u32 = 0;

        loop {
            attempt_number += 1;
            let execution = self.execute_agent(&step).await;
            let failed_execution_id = execution.execution_id;
            let error_text = execution.error.clone();
            executions.push(execution);

            if error_text.is_none() {
                break;
            }

            let Some(policy) = step.retry_policy.as_ref() else {
                break;
            };

            let ctx = RetryContext {
                run_id: run_id.clone(),
                step_id: step.step_id.clone(),
                agent_id: step.agent_id.clone(),
                attempt: attempt_number,
                error: error_text.unwrap_or_default(),
                random_seed: master_seed.wrapping_add(u64::from(attempt_number)),
                last_confidence: context.last_confidence,
                domain_hints: context.domain_hints.clone(),
            };

            if !policy.should_retry(&ctx) {
                debug!(step = %step.step_id, attempt = attempt_number, "policy declined retry");
                break;
            }

            let delay = policy.next_delay(&ctx);
            info!(
                step = %step.step_id,
                attempt = attempt_number,
                delay_seconds = delay,
                "retrying step"
            );

            attempts.push(RetryAttempt {
                attempt_id: Uuid::new_v4(),
                step_id: step.step_id.clone(),
                attempt_number,
                delay_seconds: delay,
                reason: ctx.error.clone(),
                failed_execution_id,
            });

            // Decorrelate the sleep jitter from the policy's own draw while
            // keeping it derivable from the same seed for replay.
            let mut rng = StdRng::seed_from_u64(ctx.random_seed ^ 0x9e37_79b9_7f4a_7c15);
            let jitter: f64 = rng.gen_range(-0.1..=0.1);
            let sleep_for = (delay * (1.0 + jitter)).max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(sleep_for)).await;
        }

        (executions, attempts)
    }

    /// Run one agent call under the step deadline, capturing the outcome as
    /// an execution record. Parameters are cloned per attempt so agents
    /// never share mutable state.
    async fn execute_agent(&self, step: &SwarmStep) -> AgentExecution {
        let started_at = Utc::now();

        let Some(agent) = self.registry.get(&step.agent_id) else {
            let err = TriageError::AgentNotFound {
                agent_id: step.agent_id.clone(),
            };
            warn!(step = %step.step_id, "agent not registered");
            return AgentExecution {
                execution_id: Uuid::new_v4(),
                agent_id: step.agent_id.clone(),
                agent_version: "N/A".to_string(),
                logic_hash: "N/A".to_string(),
                step_id: step.step_id.clone(),
                input_parameters: step.parameters.clone(),
                output_evidence: Vec::new(),
                error: Some(err.to_string()),
                error_kind: Some(err.kind().to_string()),
                started_at,
                finished_at: Utc::now(),
            };
        };

        let execution_id = Uuid::new_v4();
        let parameters = step.parameters.clone();

        let result = timeout(self.step_deadline, agent.execute(&parameters, &step.step_id)).await;

        let (evidence, error, error_kind) = match result {
            Ok(Ok(drafts)) => {
                let evidence: Vec<Evidence> = drafts
                    .into_iter()
                    .map(|draft| Evidence {
                        evidence_id: Uuid::new_v4(),
                        source_execution_id: execution_id,
                        agent_id: step.agent_id.clone(),
                        content: draft.content,
                        confidence: draft.confidence.clamp(0.0, 1.0),
                        kind: draft.kind,
                    })
                    .collect();
                (evidence, None, None)
            }
            Ok(Err(err)) => (
                Vec::new(),
                Some(err.to_string()),
                Some(err.kind().to_string()),
            ),
            Err(_) => {
                let err = TriageError::Timeout {
                    operation: format!("agent {}", step.agent_id),
                    seconds: self.step_deadline.as_secs(),
                };
                (
                    Vec::new(),
                    Some(err.to_string()),
                    Some(err.kind().to_string()),
                )
            }
        };

        AgentExecution {
            execution_id,
            agent_id: step.agent_id.clone(),
            agent_version: agent.version().to_string(),
            logic_hash: agent.logic_hash().to_string(),
            step_id: step.step_id.clone(),
            input_parameters: parameters,
            output_evidence: evidence,
            error,
            error_kind,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::agent::{Agent, EvidenceDraft};
    use crate::swarm::model::EvidenceKind;
    use crate::swarm::policy::ExponentialBackoffPolicy;
    use crate::utils::error::TriageResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAgent {
        id: String,
        hash: String,
        fail_times: u32,
        calls: AtomicU32,
    }

    impl FlakyAgent {
        fn new(id: &str, fail_times: u32) -> Self {
            Self {
                id: id.to_string(),
                hash: crate::swarm::agent::agent_logic_hash(id),
                fail_times,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }

        fn logic_hash(&self) -> &str {
            &self.hash
        }

        async fn execute(
            &self,
            _parameters: &serde_json::Value,
            _step_id: &str,
        ) -> TriageResult<Vec<EvidenceDraft>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(TriageError::Network {
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(vec![EvidenceDraft::new(
                    serde_json::json!({"finding": "ok"}),
                    0.9,
                    EvidenceKind::Log,
                )])
            }
        }
    }

    struct HangingAgent;

    #[async_trait]
    impl Agent for HangingAgent {
        fn agent_id(&self) -> &str {
            "hanging"
        }

        fn logic_hash(&self) -> &str {
            "static"
        }

        async fn execute(
            &self,
            _parameters: &serde_json::Value,
            _step_id: &str,
        ) -> TriageResult<Vec<EvidenceDraft>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn orchestrator(registry: AgentRegistry, deadline: Duration) -> SwarmOrchestrator {
        SwarmOrchestrator::new(Arc::new(registry), deadline)
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_policy() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FlakyAgent::new("loganalysis", 1)));

        let step = SwarmStep::new("loganalysis")
            .with_step_id("loganalysis")
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(3, 0.01, 0.05)));

        let outcome = orchestrator(registry, Duration::from_secs(5))
            .execute_swarm(&[step], "run-1", 7, &HashMap::new())
            .await;

        assert_eq!(outcome.executions.len(), 2);
        assert!(!outcome.executions[0].is_successful());
        assert!(outcome.executions[1].is_successful());
        assert_eq!(outcome.retry_attempts.len(), 1);
        assert_eq!(outcome.retry_attempts[0].attempt_number, 1);
        assert_eq!(
            outcome.retry_attempts[0].failed_execution_id,
            outcome.executions[0].execution_id
        );
    }

    #[tokio::test]
    async fn retries_exhaust_when_agent_keeps_failing() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FlakyAgent::new("threatintel", u32::MAX)));

        let step = SwarmStep::new("threatintel")
            .with_step_id("threatintel")
            .with_retry_policy(Arc::new(ExponentialBackoffPolicy::new(3, 0.01, 0.05)));

        let outcome = orchestrator(registry, Duration::from_secs(5))
            .execute_swarm(&[step], "run-2", 11, &HashMap::new())
            .await;

        // max_attempts=3 means three executions, two audited retries.
        assert_eq!(outcome.executions.len(), 3);
        assert!(outcome.executions.iter().all(|e| !e.is_successful()));
        assert_eq!(outcome.retry_attempts.len(), 2);
        let numbers: Vec<u32> = outcome
            .retry_attempts
            .iter()
            .map(|a| a.attempt_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_agent_fails_without_retry() {
        let registry = AgentRegistry::new();
        let step = SwarmStep::new("ghost").with_step_id("ghost");
        let outcome = orchestrator(registry, Duration::from_secs(5))
            .execute_swarm(&[step], "run-3", 1, &HashMap::new())
            .await;

        assert_eq!(outcome.executions.len(), 1);
        assert_eq!(
            outcome.executions[0].error_kind.as_deref(),
            Some("agent_not_found")
        );
    }

    #[tokio::test]
    async fn deadline_produces_typed_timeout() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(HangingAgent));
        let step = SwarmStep::new("hanging").with_step_id("hang-step");

        let outcome = orchestrator(registry, Duration::from_millis(50))
            .execute_swarm(&[step], "run-4", 1, &HashMap::new())
            .await;

        assert_eq!(outcome.executions.len(), 1);
        assert_eq!(outcome.executions[0].error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn steps_without_policy_fail_once() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(FlakyAgent::new("oneshot", u32::MAX)));
        let step = SwarmStep::new("oneshot").with_step_id("oneshot");

        let outcome = orchestrator(registry, Duration::from_secs(5))
            .execute_swarm(&[step], "run-5", 1, &HashMap::new())
            .await;

        assert_eq!(outcome.executions.len(), 1);
        assert!(outcome.retry_attempts.is_empty());
    }
}
