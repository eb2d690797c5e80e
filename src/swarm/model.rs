//! Swarm run data model.
//!
//! Everything here is an auditable record: executions, retry attempts,
//! retry decisions, human decisions, operational outcomes, and the run
//! itself. Records are immutable once persisted to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::decision::model::Decision;
use crate::swarm::policy::RetryPolicy;

/// Kind of evidence an agent can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Metric,
    Log,
    Trace,
    Hypothesis,
    Document,
    RawData,
}

/// A piece of evidence produced by an agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: Uuid,
    pub source_execution_id: Uuid,
    pub agent_id: String,
    pub content: serde_json::Value,
    pub confidence: f64,
    pub kind: EvidenceKind,
}

impl Evidence {
    #[must_use]
    pub fn new(
        source_execution_id: Uuid,
        agent_id: impl Into<String>,
        content: serde_json::Value,
        confidence: f64,
        kind: EvidenceKind,
    ) -> Self {
        Self {
            evidence_id: Uuid::new_v4(),
            source_execution_id,
            agent_id: agent_id.into(),
            content,
            confidence: confidence.clamp(0.0, 1.0),
            kind,
        }
    }
}

/// A single, auditable execution of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub execution_id: Uuid,
    pub agent_id: String,
    pub agent_version: String,
    pub logic_hash: String,
    pub step_id: String,
    pub input_parameters: serde_json::Value,
    pub output_evidence: Vec<Evidence>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentExecution {
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }
}

/// One step of a swarm plan, bound to an agent by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmStep {
    pub step_id: String,
    pub agent_id: String,
    pub mandatory: bool,
    pub min_confidence: f64,
    pub parameters: serde_json::Value,
    #[serde(skip)]
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl SwarmStep {
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            step_id: format!("{agent_id}-{}", Uuid::new_v4()),
            agent_id,
            mandatory: true,
            min_confidence: 0.7,
            parameters: serde_json::json!({}),
            retry_policy: None,
        }
    }

    #[must_use]
    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = step_id.into();
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// Objective plus ordered steps for one swarm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmPlan {
    pub plan_id: Uuid,
    pub objective: String,
    pub steps: Vec<SwarmStep>,
}

impl SwarmPlan {
    #[must_use]
    pub fn new(objective: impl Into<String>, steps: Vec<SwarmStep>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            objective: objective.into(),
            steps,
        }
    }
}

/// Auditable record of one retry of a failed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt_id: Uuid,
    pub step_id: String,
    pub attempt_number: u32,
    pub delay_seconds: f64,
    pub reason: String,
    pub failed_execution_id: Uuid,
}

/// Auditable record of why a retry policy approved a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDecision {
    pub decision_id: Uuid,
    pub step_id: String,
    pub attempt_id: Uuid,
    pub reason: String,
    pub policy_name: String,
    pub policy_version: String,
    pub policy_logic_hash: String,
}

/// Outcome of the between-round retry evaluation.
#[derive(Debug, Clone, Default)]
pub struct RetryEvaluation {
    pub steps_to_retry: Vec<SwarmStep>,
    pub retry_attempts: Vec<RetryAttempt>,
    pub retry_decisions: Vec<RetryDecision>,
    pub max_delay_seconds: f64,
    pub newly_successful_step_ids: HashSet<String>,
}

/// Action taken by a human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumanAction {
    Accept,
    Reject,
    Override,
}

/// A human reviewer's verdict on a proposed decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    pub action: HumanAction,
    pub author: String,
    pub override_reason: Option<String>,
    pub overridden_action_proposed: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Real-world outcome recorded after an action is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalOutcome {
    pub outcome_id: Uuid,
    pub status: String,
    pub impact_level: String,
    pub resolution_time_seconds: Option<f64>,
    pub details: Option<String>,
}

/// Risk classification of an operating domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Cognitive domain a run operates in; the only tenant discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub name: String,
    pub description: String,
    pub risk_level: RiskLevel,
}

impl Domain {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            risk_level,
        }
    }
}

/// Lifecycle state of a swarm run. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Running,
    Finished,
    AbortedByLimit,
    DuplicateSkipped,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Finished | RunStatus::AbortedByLimit | RunStatus::DuplicateSkipped
        )
    }
}

/// Bookkeeping captured on the run record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub total_rounds: u32,
    pub total_attempts: u32,
    pub aborted_by_limit: bool,
    pub fatal: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The event that may trigger a swarm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerAlert {
    pub alert_id: String,
    pub data: serde_json::Value,
}

impl TriggerAlert {
    #[must_use]
    pub fn new(alert_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            alert_id: alert_id.into(),
            data,
        }
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// One complete execution of a swarm against a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmRun {
    pub run_id: String,
    pub domain: Domain,
    pub plan: SwarmPlan,
    pub master_seed: u64,
    pub executions: Vec<AgentExecution>,
    pub final_decision: Option<Decision>,
    pub status: RunStatus,
    pub metadata: RunMetadata,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persistable report of a decision replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub report_id: Uuid,
    pub original_decision_id: Uuid,
    pub replayed_decision_id: Uuid,
    pub causal_divergences: Vec<String>,
    pub confidence_delta: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_success_iff_no_error() {
        let execution = AgentExecution {
            execution_id: Uuid::new_v4(),
            agent_id: "a".to_string(),
            agent_version: "1.0".to_string(),
            logic_hash: "h".to_string(),
            step_id: "s".to_string(),
            input_parameters: serde_json::json!({}),
            output_evidence: Vec::new(),
            error: None,
            error_kind: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        assert!(execution.is_successful());

        let failed = AgentExecution {
            error: Some("boom".to_string()),
            error_kind: Some("network".to_string()),
            ..execution
        };
        assert!(!failed.is_successful());
    }

    #[test]
    fn terminal_states_are_flagged() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Finished.is_terminal());
        assert!(RunStatus::AbortedByLimit.is_terminal());
        assert!(RunStatus::DuplicateSkipped.is_terminal());
    }

    #[test]
    fn evidence_confidence_is_clamped() {
        let ev = Evidence::new(
            Uuid::new_v4(),
            "agent",
            serde_json::json!("finding"),
            2.0,
            EvidenceKind::Log,
        );
        assert_eq!(ev.confidence, 1.0);
    }
}
