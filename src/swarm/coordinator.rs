//! Swarm run coordination.
//!
//! Stateful for one run: drives the orchestrator, the retry controller and
//! the decision controller under run-level bounds, gated by distributed
//! deduplication, with every artifact persisted to the audit ledger. The
//! same entry point serves live execution and deterministic replay.

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::confidence::ConfidenceService;
use crate::dedup::{DedupAction, Deduplicator};
use crate::infrastructure::metrics::MetricsService;
use crate::ledger::AuditLedger;
use crate::swarm::decision_controller::{HumanHook, SwarmDecisionController};
use crate::swarm::model::{
    AgentExecution, Domain, HumanAction, OperationalOutcome, RetryAttempt, RetryDecision,
    RunMetadata, RunStatus, SwarmPlan, SwarmRun, SwarmStep, TriggerAlert,
};
use crate::swarm::orchestrator::{RoundOutcome, StepContext, SwarmOrchestrator};
use crate::swarm::policy::ConfidencePolicy;
use crate::swarm::retry_controller::SwarmRetryController;
use crate::utils::config::SwarmConfig;
use crate::utils::error::{TriageError, TriageResult};

/// Step id used for the coordinator's LLM fallback step; deterministic so
/// replay can map the historical execution back onto it.
pub const LLM_FALLBACK_STEP_ID: &str = "llm_fallback";

/// Result of one coordinated run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: SwarmRun,
    pub retry_attempts: Vec<RetryAttempt>,
    pub retry_decisions: Vec<RetryDecision>,
    /// Set when the run was skipped as a duplicate of an existing one.
    pub duplicate_of: Option<String>,
}

/// Orchestrates the specialized controllers to run a swarm plan.
pub struct SwarmRunCoordinator {
    orchestrator: SwarmOrchestrator,
    retry_controller: SwarmRetryController,
    decision_controller: SwarmDecisionController,
    confidence: Arc<ConfidenceService>,
    deduplicator: Arc<Deduplicator>,
    ledger: Arc<dyn AuditLedger>,
    metrics: Arc<MetricsService>,
    config: SwarmConfig,
    decay_rate: f64,
    run_statuses: DashMap<String, RunStatus>,
}

impl SwarmRunCoordinator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        orchestrator: SwarmOrchestrator,
        confidence: Arc<ConfidenceService>,
        deduplicator: Arc<Deduplicator>,
        ledger: Arc<dyn AuditLedger>,
        metrics: Arc<MetricsService>,
        config: SwarmConfig,
        decay_rate: f64,
    ) -> Self {
        Self {
            orchestrator,
            retry_controller: SwarmRetryController::new(),
            decision_controller: SwarmDecisionController::new(),
            confidence,
            deduplicator,
            ledger,
            metrics,
            config,
            decay_rate,
            run_statuses: DashMap::new(),
        }
    }

    /// Current lifecycle state of a run, if this coordinator has seen it.
    #[must_use]
    pub fn run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.run_statuses.get(run_id).map(|s| *s)
    }

    fn set_status(&self, run_id: &str, status: RunStatus) {
        match self.run_statuses.get(run_id).map(|s| *s) {
            Some(current) if current.is_terminal() => {
                warn!(run_id, ?current, "refusing status change on terminal run");
            }
            _ => {
                self.run_statuses.insert(run_id.to_string(), status);
            }
        }
    }

    /// Execute a plan for an alert. `replay_results` switches the
    /// coordinator into replay mode: historical executions are returned
    /// instead of calling agents, and no persistence or dedup happens.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        domain: Domain,
        plan: SwarmPlan,
        alert: TriggerAlert,
        run_id: String,
        confidence_policy: &dyn ConfidencePolicy,
        human_hook: Option<HumanHook>,
        master_seed: Option<u64>,
        replay_results: Option<&HashMap<String, AgentExecution>>,
    ) -> TriageResult<RunOutcome> {
        let replay_mode = replay_results.is_some();
        self.set_status(&run_id, RunStatus::Created);

        let severity = alert.field("severity").unwrap_or("warning").to_string();
        let source = alert.field("source").unwrap_or("grafana").to_string();
        let lock_name = format!("swarm_run:{}", alert.alert_id);

        if !replay_mode {
            if !self.deduplicator.acquire_lock(&lock_name) {
                self.metrics.record_webhook("contended");
                return Err(TriageError::Contention { name: lock_name });
            }

            let (action, existing_run_id) =
                self.deduplicator
                    .check_duplicate(&alert.alert_id, &alert.data, &severity, &source);
            if action != DedupAction::New {
                self.deduplicator.release_lock(&lock_name);
                let label = match action {
                    DedupAction::UpdateExisting => "update_existing",
                    DedupAction::Skip => "skip",
                    DedupAction::New => unreachable!(),
                };
                self.metrics.record_dedup(label);
                self.set_status(&run_id, RunStatus::DuplicateSkipped);
                info!(run_id, existing = ?existing_run_id, "duplicate alert, skipping run");

                let run = SwarmRun {
                    run_id: run_id.clone(),
                    domain,
                    plan,
                    master_seed: master_seed.unwrap_or(0),
                    executions: Vec::new(),
                    final_decision: None,
                    status: RunStatus::DuplicateSkipped,
                    metadata: RunMetadata::default(),
                    started_at: chrono::Utc::now(),
                    finished_at: Some(chrono::Utc::now()),
                };
                return Ok(RunOutcome {
                    run,
                    retry_attempts: Vec::new(),
                    retry_decisions: Vec::new(),
                    duplicate_of: existing_run_id,
                });
            }
            self.metrics.record_dedup("new_execution");
        }

        let result = self
            .run_locked(
                domain,
                plan,
                &alert,
                &run_id,
                confidence_policy,
                human_hook,
                master_seed,
                replay_results,
                &severity,
                &source,
            )
            .await;

        if !replay_mode {
            self.deduplicator.release_lock(&lock_name);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_locked(
        &self,
        domain: Domain,
        plan: SwarmPlan,
        alert: &TriggerAlert,
        run_id: &str,
        confidence_policy: &dyn ConfidencePolicy,
        human_hook: Option<HumanHook>,
        master_seed: Option<u64>,
        replay_results: Option<&HashMap<String, AgentExecution>>,
        severity: &str,
        source: &str,
    ) -> TriageResult<RunOutcome> {
        let replay_mode = replay_results.is_some();
        let started = Instant::now();
        let started_at = chrono::Utc::now();
        self.set_status(run_id, RunStatus::Running);

        let master_seed =
            master_seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000));
        let mut rng = StdRng::seed_from_u64(master_seed);

        // Stale credibility decays before execution so retry contexts see
        // current values.
        if !replay_mode {
            let mut seen: HashSet<&str> = HashSet::new();
            for step in &plan.steps {
                if seen.insert(step.agent_id.as_str()) {
                    self.confidence
                        .apply_time_decay(&step.agent_id, self.decay_rate)
                        .await?;
                }
            }
        }

        let mut contexts: HashMap<String, StepContext> = HashMap::new();
        for step in &plan.steps {
            contexts.insert(
                step.step_id.clone(),
                StepContext {
                    last_confidence: self.confidence.last_confidence(&step.agent_id).await,
                    domain_hints: vec![domain.name.clone()],
                },
            );
        }

        let mut all_executions: Vec<AgentExecution> = Vec::new();
        let mut all_retry_attempts: Vec<RetryAttempt> = Vec::new();
        let mut all_retry_decisions: Vec<RetryDecision> = Vec::new();
        let mut successful_step_ids: HashSet<String> = HashSet::new();

        let mut round_counter: u32 = 0;
        let mut attempts_counter: u32 = 0;
        let mut aborted_by_limit = false;

        let mut steps_to_process: Vec<SwarmStep> = plan.steps.clone();

        let main_loop = async {
            while !steps_to_process.is_empty() {
                if round_counter >= self.config.max_retry_rounds
                    || attempts_counter >= self.config.max_total_attempts
                {
                    aborted_by_limit = true;
                    break;
                }

                round_counter += 1;
                attempts_counter += steps_to_process.len() as u32;

                let outcome = self
                    .execute_round(&steps_to_process, run_id, master_seed, &contexts, replay_results)
                    .await;
                all_executions.extend(outcome.executions);
                all_retry_attempts.extend(outcome.retry_attempts);

                let eval = self
                    .retry_controller
                    .evaluate(
                        &plan,
                        &all_executions,
                        &all_retry_attempts,
                        &self.confidence,
                        run_id,
                        master_seed,
                        &successful_step_ids,
                    )
                    .await;

                all_retry_attempts.extend(eval.retry_attempts);
                all_retry_decisions.extend(eval.retry_decisions);
                successful_step_ids.extend(eval.newly_successful_step_ids);
                steps_to_process = eval.steps_to_retry;

                if !steps_to_process.is_empty() && eval.max_delay_seconds > 0.0 && !replay_mode {
                    let jitter: f64 = rng.gen_range(-0.1..=0.1);
                    let sleep_for = (eval.max_delay_seconds * (1.0 + jitter)).max(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(sleep_for)).await;
                }
            }
        };

        if timeout(Duration::from_secs(self.config.max_runtime_seconds), main_loop)
            .await
            .is_err()
        {
            warn!(run_id, "runtime bound exceeded, aborting run");
            aborted_by_limit = true;
        }

        let mut final_successful: Vec<AgentExecution> = all_executions
            .iter()
            .filter(|ex| successful_step_ids.contains(&ex.step_id))
            .cloned()
            .collect();

        let all_mandatory_successful = plan
            .steps
            .iter()
            .filter(|s| s.mandatory)
            .all(|s| successful_step_ids.contains(&s.step_id));

        let mean_evidence_confidence = {
            let confidences: Vec<f64> = final_successful
                .iter()
                .flat_map(|ex| ex.output_evidence.iter().map(|ev| ev.confidence))
                .collect();
            if confidences.is_empty() {
                0.0
            } else {
                confidences.iter().sum::<f64>() / confidences.len() as f64
            }
        };

        let should_trigger_llm = self.config.use_llm_fallback
            && self.config.llm_agent_id.is_some()
            && (!all_mandatory_successful
                || mean_evidence_confidence <= self.config.llm_fallback_threshold);

        if should_trigger_llm {
            let llm_agent_id = self.config.llm_agent_id.clone().unwrap_or_default();
            info!(
                run_id,
                mandatory_ok = all_mandatory_successful,
                mean_confidence = mean_evidence_confidence,
                "triggering llm fallback agent"
            );

            let context_document = serde_json::json!({
                "alert": alert.data,
                "run_id": run_id,
                "evidence": final_successful
                    .iter()
                    .flat_map(|ex| ex.output_evidence.iter())
                    .map(|ev| serde_json::json!({
                        "agent_id": ev.agent_id,
                        "confidence": ev.confidence,
                        "content": ev.content,
                    }))
                    .collect::<Vec<_>>(),
                "avg_confidence": mean_evidence_confidence,
                "mandatory_success": all_mandatory_successful,
            });

            let llm_step = SwarmStep::new(llm_agent_id)
                .with_step_id(LLM_FALLBACK_STEP_ID)
                .with_parameters(context_document);

            let outcome = self
                .execute_round(&[llm_step], run_id, master_seed, &contexts, replay_results)
                .await;
            for execution in outcome.executions {
                if execution.is_successful() {
                    successful_step_ids.insert(execution.step_id.clone());
                    final_successful.push(execution.clone());
                }
                all_executions.push(execution);
            }
        }

        let decision = self
            .decision_controller
            .decide(
                &final_successful,
                alert,
                &self.confidence,
                confidence_policy,
                human_hook.as_ref(),
            )
            .await;

        let status = if aborted_by_limit {
            RunStatus::AbortedByLimit
        } else {
            RunStatus::Finished
        };

        let run = SwarmRun {
            run_id: run_id.to_string(),
            domain: domain.clone(),
            plan,
            master_seed,
            executions: all_executions,
            final_decision: Some(decision.clone()),
            status,
            metadata: RunMetadata {
                total_rounds: round_counter,
                total_attempts: attempts_counter,
                aborted_by_limit,
                fatal: false,
                extra: HashMap::new(),
            },
            started_at,
            finished_at: Some(chrono::Utc::now()),
        };

        if !replay_mode {
            self.ledger
                .save_swarm_run(
                    &run,
                    alert,
                    &all_retry_attempts,
                    &all_retry_decisions,
                    master_seed,
                )
                .await?;

            if let Some(human) = &decision.human_decision {
                if human.action == HumanAction::Override {
                    let outcome = OperationalOutcome {
                        outcome_id: Uuid::new_v4(),
                        status: "pending".to_string(),
                        impact_level: "not_assessed".to_string(),
                        resolution_time_seconds: None,
                        details: human.override_reason.clone(),
                    };
                    self.ledger
                        .save_human_override(&decision, human, &outcome)
                        .await?;
                }
            }

            self.deduplicator.register_execution(
                &alert.alert_id,
                run_id,
                &alert.data,
                severity,
                source,
            );

            self.metrics
                .record_execution(started.elapsed().as_secs_f64(), &domain.name, severity);
            self.metrics
                .record_decision(decision.confidence, &decision.state.to_string());
        }

        self.set_status(run_id, status);
        info!(
            run_id,
            ?status,
            rounds = round_counter,
            attempts = attempts_counter,
            "run complete"
        );

        Ok(RunOutcome {
            run,
            retry_attempts: all_retry_attempts,
            retry_decisions: all_retry_decisions,
            duplicate_of: None,
        })
    }

    /// Execute one round of steps, live or from replay history.
    async fn execute_round(
        &self,
        steps: &[SwarmStep],
        run_id: &str,
        master_seed: u64,
        contexts: &HashMap<String, StepContext>,
        replay_results: Option<&HashMap<String, AgentExecution>>,
    ) -> RoundOutcome {
        match replay_results {
            Some(results) => {
                let executions = steps
                    .iter()
                    .map(|step| {
                        results.get(&step.step_id).cloned().unwrap_or_else(|| {
                            warn!(step = %step.step_id, "no historical execution for replayed step");
                            AgentExecution {
                                execution_id: Uuid::new_v4(),
                                agent_id: step.agent_id.clone(),
                                agent_version: "N/A".to_string(),
                                logic_hash: "N/A".to_string(),
                                step_id: step.step_id.clone(),
                                input_parameters: step.parameters.clone(),
                                output_evidence: Vec::new(),
                                error: Some("missing replay execution".to_string()),
                                error_kind: Some("ledger".to_string()),
                                started_at: chrono::Utc::now(),
                                finished_at: chrono::Utc::now(),
                            }
                        })
                    })
                    .collect();
                RoundOutcome {
                    executions,
                    retry_attempts: Vec::new(),
                }
            }
            None => {
                self.orchestrator
                    .execute_swarm(steps, run_id, master_seed, contexts)
                    .await
            }
        }
    }
}

impl SwarmRunCoordinator {
    /// Ledger handle for the replay engine and the API layer.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn AuditLedger> {
        &self.ledger
    }
}
