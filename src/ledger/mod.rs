//! Audit/causal ledger port.
//!
//! Append-only persistence for runs, executions, evidence, decisions,
//! overrides, and confidence snapshots. The core depends only on this
//! port; graph-store backends are external. The in-memory implementation
//! serves tests and offline pipelines with the same contract, including
//! uniqueness and monotonicity enforcement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::confidence::ConfidenceSnapshot;
use crate::decision::model::Decision;
use crate::swarm::model::{
    HumanDecision, OperationalOutcome, ReplayReport, RetryAttempt, RetryDecision, SwarmRun,
    TriggerAlert,
};
use crate::utils::error::{TriageError, TriageResult};

/// Everything needed to deterministically replay a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run: SwarmRun,
    pub alert: TriggerAlert,
    pub retry_attempts: Vec<RetryAttempt>,
    pub retry_decisions: Vec<RetryDecision>,
    pub master_seed: u64,
    /// Confidence snapshots frozen at the run's persistence point.
    pub snapshots: Vec<ConfidenceSnapshot>,
}

/// Append-only ledger operations exposed to the core.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Persist a complete run atomically. Run ids are unique; a second save
    /// for the same id is an integrity error.
    async fn save_swarm_run(
        &self,
        run: &SwarmRun,
        alert: &TriggerAlert,
        retries: &[RetryAttempt],
        retry_decisions: &[RetryDecision],
        master_seed: u64,
    ) -> TriageResult<()>;

    /// Persist a human override with its operational outcome, linked to the
    /// overridden decision.
    async fn save_human_override(
        &self,
        decision: &Decision,
        human_decision: &HumanDecision,
        outcome: &OperationalOutcome,
    ) -> TriageResult<()>;

    /// Append one confidence snapshot. Sequence ids must be strictly
    /// increasing per agent.
    async fn create_confidence_snapshot(&self, snapshot: &ConfidenceSnapshot) -> TriageResult<()>;

    /// Link an existing snapshot to the event that caused it.
    async fn link_snapshot_to_cause(
        &self,
        snapshot_id: Uuid,
        cause_id: &str,
        cause_type: &str,
    ) -> TriageResult<()>;

    /// Most recent snapshot for an agent, if any.
    async fn latest_confidence_snapshot(
        &self,
        agent_id: &str,
    ) -> TriageResult<Option<ConfidenceSnapshot>>;

    /// Load the full persisted context of a run.
    async fn fetch_full_run_context(&self, run_id: &str) -> TriageResult<RunContext>;

    /// Persist a replay report.
    async fn save_replay_report(&self, report: &ReplayReport) -> TriageResult<()>;

    /// Known-procedure suggestion for an alert signature, if one exists.
    async fn find_procedure_by_signature(&self, signature: &str) -> TriageResult<Option<String>>;

    /// Liveness probe for the health endpoint.
    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Clone)]
struct OverrideRecord {
    decision: Decision,
    human_decision: HumanDecision,
    outcome: OperationalOutcome,
}

#[derive(Default)]
struct LedgerState {
    runs: HashMap<String, RunContext>,
    overrides: Vec<OverrideRecord>,
    snapshots: HashMap<String, Vec<ConfidenceSnapshot>>,
    snapshot_causes: HashMap<Uuid, (String, String)>,
    replay_reports: Vec<ReplayReport>,
    procedures: HashMap<String, String>,
}

/// In-memory ledger implementation.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted runs (test observability).
    pub async fn run_count(&self) -> usize {
        self.state.read().await.runs.len()
    }

    /// Persisted override records (test observability).
    pub async fn override_count(&self) -> usize {
        self.state.read().await.overrides.len()
    }

    /// All snapshots for one agent, in append order.
    pub async fn snapshots_for(&self, agent_id: &str) -> Vec<ConfidenceSnapshot> {
        self.state
            .read()
            .await
            .snapshots
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a known procedure for an alert signature.
    pub async fn register_procedure(&self, signature: &str, procedure: &str) {
        self.state
            .write()
            .await
            .procedures
            .insert(signature.to_string(), procedure.to_string());
    }
}

#[async_trait]
impl AuditLedger for MemoryLedger {
    async fn save_swarm_run(
        &self,
        run: &SwarmRun,
        alert: &TriggerAlert,
        retries: &[RetryAttempt],
        retry_decisions: &[RetryDecision],
        master_seed: u64,
    ) -> TriageResult<()> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.run_id) {
            return Err(TriageError::Ledger {
                reason: format!("run {} already persisted", run.run_id),
            });
        }

        // Snapshot the per-agent confidence state as of this save so replay
        // can freeze credibility at the run boundary.
        let frozen: Vec<ConfidenceSnapshot> = state
            .snapshots
            .values()
            .filter_map(|snapshots| snapshots.last().cloned())
            .collect();

        state.runs.insert(
            run.run_id.clone(),
            RunContext {
                run: run.clone(),
                alert: alert.clone(),
                retry_attempts: retries.to_vec(),
                retry_decisions: retry_decisions.to_vec(),
                master_seed,
                snapshots: frozen,
            },
        );

        if let Some(decision) = &run.final_decision {
            state.procedures.insert(
                alert_signature(alert),
                format!("{}: {}", decision.action_proposed, decision.justification),
            );
        }

        info!(run_id = %run.run_id, executions = run.executions.len(), "run persisted");
        Ok(())
    }

    async fn save_human_override(
        &self,
        decision: &Decision,
        human_decision: &HumanDecision,
        outcome: &OperationalOutcome,
    ) -> TriageResult<()> {
        let mut state = self.state.write().await;
        state.overrides.push(OverrideRecord {
            decision: decision.clone(),
            human_decision: human_decision.clone(),
            outcome: outcome.clone(),
        });
        info!(decision_id = %decision.decision_id, "human override persisted");
        Ok(())
    }

    async fn create_confidence_snapshot(&self, snapshot: &ConfidenceSnapshot) -> TriageResult<()> {
        let mut state = self.state.write().await;
        let snapshots = state
            .snapshots
            .entry(snapshot.agent_id.clone())
            .or_default();

        if let Some(last) = snapshots.last() {
            if snapshot.sequence_id <= last.sequence_id {
                return Err(TriageError::Fatal {
                    reason: format!(
                        "non-monotonic snapshot sequence for {}: {} after {}",
                        snapshot.agent_id, snapshot.sequence_id, last.sequence_id
                    ),
                });
            }
        }

        snapshots.push(snapshot.clone());
        debug!(
            agent_id = %snapshot.agent_id,
            sequence_id = snapshot.sequence_id,
            value = snapshot.value,
            "confidence snapshot appended"
        );
        Ok(())
    }

    async fn link_snapshot_to_cause(
        &self,
        snapshot_id: Uuid,
        cause_id: &str,
        cause_type: &str,
    ) -> TriageResult<()> {
        self.state
            .write()
            .await
            .snapshot_causes
            .insert(snapshot_id, (cause_id.to_string(), cause_type.to_string()));
        Ok(())
    }

    async fn latest_confidence_snapshot(
        &self,
        agent_id: &str,
    ) -> TriageResult<Option<ConfidenceSnapshot>> {
        Ok(self
            .state
            .read()
            .await
            .snapshots
            .get(agent_id)
            .and_then(|snapshots| snapshots.last().cloned()))
    }

    async fn fetch_full_run_context(&self, run_id: &str) -> TriageResult<RunContext> {
        self.state
            .read()
            .await
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| TriageError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn save_replay_report(&self, report: &ReplayReport) -> TriageResult<()> {
        self.state.write().await.replay_reports.push(report.clone());
        Ok(())
    }

    async fn find_procedure_by_signature(&self, signature: &str) -> TriageResult<Option<String>> {
        Ok(self.state.read().await.procedures.get(signature).cloned())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Stable signature for intake-time procedure lookup.
#[must_use]
pub fn alert_signature(alert: &TriggerAlert) -> String {
    let severity = alert.field("severity").unwrap_or("unknown");
    let service = alert.field("service").unwrap_or("unknown");
    let source = alert.field("source").unwrap_or("unknown");
    format!("{source}:{}:{severity}:{service}", alert.alert_id)
}
