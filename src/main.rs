use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swarm_triage::ports::llm::provider_from_config;
use swarm_triage::swarm::{
    AgentRegistry, Domain, LlmAnalysisAgent, RiskLevel, SwarmOrchestrator, SwarmPlan,
    SwarmRunCoordinator,
};
use swarm_triage::{
    AlertNormalizer, AppState, ConfidenceService, CorrelationEngine, Deduplicator, MemoryLedger,
    MetricsService, TriageConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TriageConfig::from_env().context("loading configuration")?;
    init_tracing(&config);

    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting swarm-triage"
    );

    let config = Arc::new(config);
    let metrics = Arc::new(MetricsService::new());
    let ledger: Arc<dyn swarm_triage::AuditLedger> = Arc::new(MemoryLedger::new());
    let confidence = Arc::new(ConfidenceService::new(ledger.clone()));
    let deduplicator = Arc::new(Deduplicator::new(
        Duration::from_secs(config.dedup.ttl_seconds),
        Duration::from_secs(config.dedup.lock_lease_seconds),
    ));

    let registry = Arc::new(AgentRegistry::new());
    if let Some(provider) = provider_from_config(&config.llm) {
        if let Some(llm_agent_id) = &config.swarm.llm_agent_id {
            registry.register(Arc::new(LlmAnalysisAgent::new(
                llm_agent_id.clone(),
                provider,
            )));
        }
    }

    let orchestrator = SwarmOrchestrator::new(
        registry.clone(),
        Duration::from_secs(config.swarm.step_deadline_seconds),
    );

    let coordinator = Arc::new(SwarmRunCoordinator::new(
        orchestrator,
        confidence,
        deduplicator.clone(),
        ledger.clone(),
        metrics.clone(),
        config.swarm.clone(),
        config.confidence.decay_rate,
    ));

    // The default plan runs every registered agent as a mandatory step;
    // deployments register their own agents before serving.
    let plan_steps = registry
        .list()
        .into_iter()
        .map(|agent_id| {
            swarm_triage::SwarmStep::new(agent_id.clone()).with_step_id(agent_id)
        })
        .collect();
    let plan_template = Arc::new(SwarmPlan::new("triage incoming alert", plan_steps));

    let state = AppState {
        config: config.clone(),
        coordinator,
        deduplicator,
        ledger,
        metrics,
        normalizer: Arc::new(AlertNormalizer::new()),
        correlation: Arc::new(CorrelationEngine::new(
            swarm_triage::alerts::CorrelationSettings::with_window_minutes(
                config.correlation.window_minutes,
            ),
        )),
        plan_template,
        domain: Domain::new("sre", "site-reliability", RiskLevel::High),
        processing: Arc::new(AtomicBool::new(false)),
        last_execution: Arc::new(RwLock::new(None)),
    };

    swarm_triage::server::serve(state).await
}

fn init_tracing(config: &TriageConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
