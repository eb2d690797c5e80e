//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarm_triage::ports::llm::ScriptedProvider;
use swarm_triage::swarm::agent::{agent_logic_hash, Agent, EvidenceDraft};
use swarm_triage::swarm::model::EvidenceKind;
use swarm_triage::swarm::{
    AgentRegistry, Domain, LlmAnalysisAgent, RiskLevel, SwarmOrchestrator, SwarmRunCoordinator,
    TriggerAlert,
};
use swarm_triage::utils::config::SwarmConfig;
use swarm_triage::utils::error::{TriageError, TriageResult};
use swarm_triage::{ConfidenceService, Deduplicator, MemoryLedger, MetricsService, RawAlert};

/// Agent that fails a fixed number of times, then succeeds with evidence.
pub struct FlakyAgent {
    id: String,
    hash: String,
    fail_times: u32,
    confidence: f64,
    calls: AtomicU32,
}

impl FlakyAgent {
    pub fn new(id: &str, fail_times: u32, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            hash: agent_logic_hash(id),
            fail_times,
            confidence,
            calls: AtomicU32::new(0),
        }
    }

    pub fn reliable(id: &str, confidence: f64) -> Self {
        Self::new(id, 0, confidence)
    }

    pub fn always_failing(id: &str) -> Self {
        Self::new(id, u32::MAX, 0.0)
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
        step_id: &str,
    ) -> TriageResult<Vec<EvidenceDraft>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            return Err(TriageError::Network {
                reason: format!("{} unreachable", self.id),
            });
        }
        Ok(vec![EvidenceDraft::new(
            serde_json::json!({"step": step_id, "finding": format!("{} ok", self.id)}),
            self.confidence,
            EvidenceKind::Log,
        )])
    }
}

/// Agent that takes a fixed wall-clock time before succeeding.
pub struct SlowAgent {
    id: String,
    hash: String,
    delay: Duration,
}

impl SlowAgent {
    pub fn new(id: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            hash: agent_logic_hash(id),
            delay,
        }
    }
}

#[async_trait]
impl Agent for SlowAgent {
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
        tokio::time::sleep(self.delay).await;
        Ok(vec![EvidenceDraft::new(
            serde_json::json!({"finding": "slow but fine"}),
            0.9,
            EvidenceKind::Log,
        )])
    }
}

/// Everything a swarm test needs, wired over one in-memory ledger.
pub struct TestHarness {
    pub coordinator: Arc<SwarmRunCoordinator>,
    pub ledger: Arc<MemoryLedger>,
    pub deduplicator: Arc<Deduplicator>,
    pub registry: Arc<AgentRegistry>,
}

pub fn build_harness(registry: AgentRegistry, config: SwarmConfig) -> TestHarness {
    let registry = Arc::new(registry);
    let ledger = Arc::new(MemoryLedger::new());
    let ledger_port: Arc<dyn swarm_triage::AuditLedger> = ledger.clone();
    let deduplicator = Arc::new(Deduplicator::new(
        Duration::from_secs(300),
        Duration::from_secs(60),
    ));

    let orchestrator = SwarmOrchestrator::new(
        registry.clone(),
        Duration::from_secs(config.step_deadline_seconds),
    );
    let coordinator = Arc::new(SwarmRunCoordinator::new(
        orchestrator,
        Arc::new(ConfidenceService::new(ledger_port.clone())),
        deduplicator.clone(),
        ledger_port,
        Arc::new(MetricsService::new()),
        config,
        0.001,
    ));

    TestHarness {
        coordinator,
        ledger,
        deduplicator,
        registry,
    }
}

pub fn fast_swarm_config() -> SwarmConfig {
    SwarmConfig {
        max_retry_rounds: 10,
        max_total_attempts: 50,
        max_runtime_seconds: 30,
        step_deadline_seconds: 5,
        use_llm_fallback: false,
        llm_fallback_threshold: 0.5,
        llm_agent_id: None,
    }
}

pub fn llm_swarm_config() -> SwarmConfig {
    SwarmConfig {
        use_llm_fallback: true,
        llm_agent_id: Some("llm_agent".to_string()),
        ..fast_swarm_config()
    }
}

pub fn register_scripted_llm_agent(registry: &AgentRegistry, reply: &str) {
    let provider = Arc::new(ScriptedProvider::new(vec![reply.to_string()]));
    registry.register(Arc::new(LlmAnalysisAgent::new("llm_agent", provider)));
}

pub fn sre_domain() -> Domain {
    Domain::new("sre", "site-reliability", RiskLevel::High)
}

pub fn trigger_alert(alert_id: &str, service: &str, severity: &str) -> TriggerAlert {
    TriggerAlert::new(
        alert_id,
        serde_json::json!({
            "service": service,
            "severity": severity,
            "source": "grafana",
        }),
    )
}

pub fn raw_alert(
    offset_secs: i64,
    fingerprint: &str,
    service: &str,
    severity: &str,
    description: &str,
) -> RawAlert {
    let base = Utc::now() - ChronoDuration::minutes(30);
    RawAlert {
        timestamp: base + ChronoDuration::seconds(offset_secs),
        fingerprint: fingerprint.to_string(),
        service: service.to_string(),
        severity: severity.to_string(),
        description: description.to_string(),
        labels: HashMap::new(),
        source: "prometheus".to_string(),
    }
}
