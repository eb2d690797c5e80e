//! Agent port and registry.
//!
//! An agent is identified by `{id, version, logic_hash}`; the hash is a
//! stable digest of the agent's logic description used to detect drift
//! between a persisted plan and the implementation during replay. Agents
//! return evidence drafts; the orchestrator stamps execution identity.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ports::llm::{CompletionOptions, LlmProvider};
use crate::swarm::model::EvidenceKind;
use crate::utils::error::{TriageError, TriageResult};

/// Evidence as produced by an agent, before execution identity is stamped.
#[derive(Debug, Clone)]
pub struct EvidenceDraft {
    pub content: serde_json::Value,
    pub confidence: f64,
    pub kind: EvidenceKind,
}

impl EvidenceDraft {
    #[must_use]
    pub fn new(content: serde_json::Value, confidence: f64, kind: EvidenceKind) -> Self {
        Self {
            content,
            confidence,
            kind,
        }
    }
}

/// Agent port.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    /// Stable digest of the agent's logic description.
    fn logic_hash(&self) -> &str;

    async fn execute(
        &self,
        parameters: &serde_json::Value,
        step_id: &str,
    ) -> TriageResult<Vec<EvidenceDraft>>;
}

/// Digest helper for agent logic descriptions.
#[must_use]
pub fn agent_logic_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Registry of agent implementations keyed by id.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.agent_id().to_string();
        if self.agents.insert(id.clone(), agent).is_some() {
            warn!(agent_id = %id, "overwriting existing agent registration");
        } else {
            info!(agent_id = %id, "registered agent");
        }
    }

    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// LLM-backed analysis agent used as the swarm's last-resort enrichment.
///
/// Receives the run's context document as parameters and produces a single
/// HYPOTHESIS evidence with a root cause and a recommended procedure.
pub struct LlmAnalysisAgent {
    agent_id: String,
    llm: Arc<dyn LlmProvider>,
    options: CompletionOptions,
    logic_hash: String,
}

impl LlmAnalysisAgent {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            agent_id: agent_id.into(),
            llm,
            options: CompletionOptions::default(),
            logic_hash: agent_logic_hash(
                "llm hypothesis: summarize evidence, produce root_cause and recommended_procedure",
            ),
        }
    }
}

#[async_trait]
impl Agent for LlmAnalysisAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn logic_hash(&self) -> &str {
        &self.logic_hash
    }

    async fn execute(
        &self,
        parameters: &serde_json::Value,
        _step_id: &str,
    ) -> TriageResult<Vec<EvidenceDraft>> {
        let prompt = format!(
            "You analyze an SRE incident from aggregated agent evidence.\n\
             Return only a JSON object with fields: root_cause (string), \
             recommended_procedure (string), confidence (float 0.0-1.0).\n\n\
             # Run Context\n{}",
            serde_json::to_string_pretty(parameters).unwrap_or_else(|_| parameters.to_string())
        );

        let reply = self.llm.complete(&prompt, &self.options).await?;

        let start = reply.find('{');
        let end = reply.rfind('}');
        let content = match (start, end) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<serde_json::Value>(&reply[start..=end]).map_err(|e| {
                    TriageError::Parse {
                        reason: format!("llm hypothesis not valid JSON: {e}"),
                    }
                })?
            }
            _ => {
                return Err(TriageError::Parse {
                    reason: "llm hypothesis reply contained no JSON object".to_string(),
                })
            }
        };

        let confidence = content["confidence"].as_f64().unwrap_or(0.6).clamp(0.0, 1.0);
        Ok(vec![EvidenceDraft::new(
            content,
            confidence,
            EvidenceKind::Hypothesis,
        )])
    }
}
