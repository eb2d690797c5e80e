//! # Swarm Triage
//!
//! Alert-triage and decision orchestration service for site-reliability
//! operations. Webhook-delivered alerts are normalized and correlated into
//! incident clusters, enriched with metric-trend analysis and historical
//! semantic evidence, and decided through deterministic rules with a
//! bounded LLM fallback, while a parallel agent swarm produces
//! independent hypotheses under strict timeouts, retry policies and run
//! bounds, consolidated into a single governed decision and persisted as
//! an auditable causal record.
//!
//! ## Architecture Overview
//!
//! - [`alerts`]: normalization and deterministic correlation
//! - [`trend`]: per-metric trend classification and fusion
//! - [`decision`]: ordered rules, semantic recovery, LLM fallback
//! - [`swarm`]: agent registry, orchestrator, retry/decision controllers,
//!   run coordinator, replay engine
//! - [`confidence`]: append-only agent credibility snapshots
//! - [`dedup`]: distributed event deduplication and run locks
//! - [`ledger`]: audit/causal ledger port
//! - [`ports`]: LLM and vector-store ports
//! - [`infrastructure`]: metrics collection and exposition
//! - [`utils`]: configuration, errors, statistics kernel

/// Alert normalization and correlation
pub mod alerts;
/// Agent credibility tracking
pub mod confidence;
/// Decision rules, fallback chain, and composition
pub mod decision;
/// Distributed deduplication and run locks
pub mod dedup;
/// Metrics collection and exposition
pub mod infrastructure;
/// Audit/causal ledger port and in-memory implementation
pub mod ledger;
/// LLM and vector-store ports
pub mod ports;
/// HTTP surface (webhook, health, run status, metrics)
pub mod server;
/// Swarm execution, retries, governance, replay
pub mod swarm;
/// Per-metric trend analysis and fusion
pub mod trend;
/// Configuration, errors, statistics kernel
pub mod utils;

pub use alerts::{AlertCluster, AlertNormalizer, CorrelationEngine, NormalizedAlert, RawAlert};
pub use confidence::{ConfidenceService, ConfidenceSnapshot};
pub use decision::{Decision, DecisionEngine, DecisionState, RuleEngine, SemanticEvidence};
pub use dedup::{DedupAction, Deduplicator};
pub use infrastructure::MetricsService;
pub use ledger::{AuditLedger, MemoryLedger, RunContext};
pub use swarm::{
    Agent, AgentRegistry, ReplayEngine, SwarmOrchestrator, SwarmPlan, SwarmRun,
    SwarmRunCoordinator, SwarmStep, TriggerAlert,
};
pub use trend::{fuse_trends, DataPoint, MetricTrend, TrendAnalyzer, TrendState};
pub use utils::{TriageConfig, TriageError, TriageResult};

use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TriageConfig>,
    pub coordinator: Arc<SwarmRunCoordinator>,
    pub deduplicator: Arc<Deduplicator>,
    pub ledger: Arc<dyn AuditLedger>,
    pub metrics: Arc<MetricsService>,
    pub normalizer: Arc<AlertNormalizer>,
    pub correlation: Arc<CorrelationEngine>,
    pub plan_template: Arc<SwarmPlan>,
    pub domain: swarm::Domain,
    pub processing: Arc<AtomicBool>,
    pub last_execution: Arc<RwLock<Option<DateTime<Utc>>>>,
}
