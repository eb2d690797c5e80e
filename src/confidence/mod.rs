//! Agent credibility tracking.
//!
//! Every change to an agent's confidence appends an immutable snapshot with
//! a per-agent monotonic sequence id. Reads may hit the in-memory cache;
//! the ledger is authoritative. Writes hold the agent's mutex until the
//! ledger append completes, so sequence order and persisted order agree.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::AuditLedger;
use crate::swarm::policy::ConfidencePolicy;
use crate::utils::error::TriageResult;

/// What caused a confidence mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceEvent {
    Initial,
    TimeDecay,
    HumanOverride,
    SuccessfulOutcome,
}

/// Reference to the event a snapshot was caused by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCause {
    pub cause_id: String,
    pub cause_type: String,
}

/// Immutable, point-in-time confidence value for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceSnapshot {
    pub snapshot_id: Uuid,
    pub agent_id: String,
    pub value: f64,
    pub source_event: SourceEvent,
    /// Strictly increasing per agent.
    pub sequence_id: u64,
    pub cause: Option<SnapshotCause>,
    pub timestamp: DateTime<Utc>,
}

/// Manages dynamic agent credibility through traceable snapshots.
pub struct ConfidenceService {
    ledger: Arc<dyn AuditLedger>,
    cache: DashMap<String, f64>,
    sequences: DashMap<String, u64>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConfidenceService {
    #[must_use]
    pub fn new(ledger: Arc<dyn AuditLedger>) -> Self {
        Self {
            ledger,
            cache: DashMap::new(),
            sequences: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Latest confidence for an agent; 1.0 when no snapshot exists.
    pub async fn last_confidence(&self, agent_id: &str) -> f64 {
        if let Some(value) = self.cache.get(agent_id) {
            return *value;
        }

        match self.ledger.latest_confidence_snapshot(agent_id).await {
            Ok(Some(snapshot)) => {
                self.cache.insert(agent_id.to_string(), snapshot.value);
                self.sequences
                    .insert(agent_id.to_string(), snapshot.sequence_id);
                snapshot.value
            }
            Ok(None) => 1.0,
            Err(err) => {
                warn!(agent_id, error = %err, "ledger read failed, defaulting confidence");
                1.0
            }
        }
    }

    /// Multiplicative decay toward zero: `value · (1 − rate)`.
    pub async fn apply_time_decay(&self, agent_id: &str, rate: f64) -> TriageResult<f64> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let last = self.last_confidence(agent_id).await;
        let decayed = (last * (1.0 - rate)).clamp(0.0, 1.0);
        self.record(
            agent_id,
            decayed,
            SourceEvent::TimeDecay,
            Some(SnapshotCause {
                cause_id: agent_id.to_string(),
                cause_type: "SystemEvent".to_string(),
            }),
        )
        .await?;

        debug!(agent_id, from = last, to = decayed, "time decay applied");
        Ok(decayed)
    }

    /// Subtract the override penalty, floored at zero.
    pub async fn penalize_for_override(
        &self,
        agent_id: &str,
        decision_id: &str,
        policy: &dyn ConfidencePolicy,
    ) -> TriageResult<f64> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let last = self.last_confidence(agent_id).await;
        let penalized = (last - policy.penalty_for_override()).max(0.0);
        self.record(
            agent_id,
            penalized,
            SourceEvent::HumanOverride,
            Some(SnapshotCause {
                cause_id: decision_id.to_string(),
                cause_type: "Decision".to_string(),
            }),
        )
        .await?;

        info!(agent_id, from = last, to = penalized, "penalized for override");
        Ok(penalized)
    }

    /// Add the success reinforcement, capped at one.
    pub async fn reinforce_for_success(
        &self,
        agent_id: &str,
        decision_id: &str,
        policy: &dyn ConfidencePolicy,
    ) -> TriageResult<f64> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let last = self.last_confidence(agent_id).await;
        let reinforced = (last + policy.reinforcement_for_success()).min(1.0);
        self.record(
            agent_id,
            reinforced,
            SourceEvent::SuccessfulOutcome,
            Some(SnapshotCause {
                cause_id: decision_id.to_string(),
                cause_type: "Decision".to_string(),
            }),
        )
        .await?;

        info!(agent_id, from = last, to = reinforced, "reinforced for success");
        Ok(reinforced)
    }

    /// Append one snapshot; caller holds the agent mutex.
    async fn record(
        &self,
        agent_id: &str,
        value: f64,
        source_event: SourceEvent,
        cause: Option<SnapshotCause>,
    ) -> TriageResult<()> {
        let next_sequence = self
            .sequences
            .get(agent_id)
            .map(|s| *s + 1)
            .unwrap_or_else(|| 1);

        let snapshot = ConfidenceSnapshot {
            snapshot_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            value: value.clamp(0.0, 1.0),
            source_event,
            sequence_id: next_sequence,
            cause: cause.clone(),
            timestamp: Utc::now(),
        };

        self.ledger.create_confidence_snapshot(&snapshot).await?;
        if let Some(cause) = cause {
            self.ledger
                .link_snapshot_to_cause(snapshot.snapshot_id, &cause.cause_id, &cause.cause_type)
                .await?;
        }

        self.sequences.insert(agent_id.to_string(), next_sequence);
        self.cache.insert(agent_id.to_string(), snapshot.value);
        Ok(())
    }
}
