/// Agent port and registry
pub mod agent;
/// Run coordination under run-level bounds
pub mod coordinator;
/// Evidence aggregation and human governance
pub mod decision_controller;
/// Swarm data model
pub mod model;
/// Parallel step execution with per-step retries
pub mod orchestrator;
/// Retry and confidence policy ports
pub mod policy;
/// Deterministic replay of persisted runs
pub mod replay;
/// Between-round retry evaluation
pub mod retry_controller;

pub use agent::{Agent, AgentRegistry, EvidenceDraft, LlmAnalysisAgent};
pub use coordinator::{RunOutcome, SwarmRunCoordinator, LLM_FALLBACK_STEP_ID};
pub use decision_controller::{HumanHook, SwarmDecisionController};
pub use model::{
    AgentExecution, Domain, Evidence, EvidenceKind, HumanAction, HumanDecision,
    OperationalOutcome, ReplayReport, RetryAttempt, RetryDecision, RetryEvaluation, RiskLevel,
    RunMetadata, RunStatus, SwarmPlan, SwarmRun, SwarmStep, TriggerAlert,
};
pub use orchestrator::{RoundOutcome, StepContext, SwarmOrchestrator};
pub use policy::{
    ConfidencePolicy, DefaultConfidencePolicy, ExponentialBackoffPolicy, RetryContext, RetryPolicy,
};
pub use replay::ReplayEngine;
pub use retry_controller::SwarmRetryController;
