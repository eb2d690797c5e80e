//! Bounded fallback chain for low-confidence rule decisions.
//!
//! Stage one consults the vector store for a close historical precedent and
//! mirrors it. Stage two asks the LLM port for a structured JSON verdict.
//! Any LLM failure synthesizes a manual-review result instead of erroring;
//! the whole chain runs at most once per decision under a hard deadline.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::alerts::correlation::AlertCluster;
use crate::decision::model::{DecisionState, LlmReason, SemanticEvidence};
use crate::decision::rules::{classify_summary, RuleResult};
use crate::ports::llm::{CompletionOptions, LlmProvider};
use crate::ports::vector::{embed_text, VectorStore};
use crate::trend::model::MetricTrend;
use crate::utils::error::TriageResult;

/// Collection holding embedded past decisions.
pub const DECISION_COLLECTION: &str = "decisions";

static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid literal regex"));

/// Result of the fallback chain.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub state: DecisionState,
    pub confidence: f64,
    pub justification: String,
    pub reason: LlmReason,
}

/// Resolves low-confidence rule results through semantic recovery and,
/// failing that, a single bounded LLM call.
pub struct FallbackResolver {
    vector_store: Option<Arc<dyn VectorStore>>,
    llm: Option<Arc<dyn LlmProvider>>,
    semantic_threshold: f64,
    deadline: Duration,
    options: CompletionOptions,
}

impl FallbackResolver {
    #[must_use]
    pub fn new(
        vector_store: Option<Arc<dyn VectorStore>>,
        llm: Option<Arc<dyn LlmProvider>>,
        semantic_threshold: f64,
    ) -> Self {
        Self {
            vector_store,
            llm,
            semantic_threshold,
            deadline: Duration::from_secs(30),
            options: CompletionOptions::default(),
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the fallback chain once. `None` means nothing could improve on
    /// the rule result (no ports configured).
    pub async fn resolve(
        &self,
        cluster: &AlertCluster,
        trends: &[MetricTrend],
        semantic_evidence: &[SemanticEvidence],
        rule_result: &RuleResult,
    ) -> Option<FallbackOutcome> {
        let bounded = timeout(
            self.deadline,
            self.resolve_inner(cluster, trends, semantic_evidence, rule_result),
        )
        .await;

        match bounded {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("fallback chain exceeded deadline, synthesizing manual review");
                self.llm
                    .as_ref()
                    .map(|_| simulated_outcome(&rule_result.justification))
            }
        }
    }

    async fn resolve_inner(
        &self,
        cluster: &AlertCluster,
        trends: &[MetricTrend],
        semantic_evidence: &[SemanticEvidence],
        rule_result: &RuleResult,
    ) -> Option<FallbackOutcome> {
        if let Some(outcome) = self.semantic_recover(cluster).await {
            info!(
                confidence = outcome.confidence,
                "semantic recovery succeeded"
            );
            return Some(outcome);
        }

        let llm = self.llm.as_ref()?;
        let prompt = build_prompt(cluster, trends, semantic_evidence, rule_result);
        debug!(chars = prompt.len(), "invoking llm fallback");

        match self.invoke_llm(llm.as_ref(), &prompt).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(error = %err, "llm fallback failed, synthesizing manual review");
                Some(simulated_outcome(&rule_result.justification))
            }
        }
    }

    /// Stage one: mirror the closest historical decision above threshold.
    async fn semantic_recover(&self, cluster: &AlertCluster) -> Option<FallbackOutcome> {
        let store = self.vector_store.as_ref()?;
        let query = embed_text(&cluster_summary_text(cluster));

        let hits = match store
            .search(DECISION_COLLECTION, &query, 3, self.semantic_threshold)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "vector search failed during semantic recovery");
                return None;
            }
        };

        let best = hits.first()?;
        let summary = best
            .payload
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let state = best
            .payload
            .get("state")
            .and_then(|v| v.as_str())
            .and_then(DecisionState::parse)
            .or_else(|| classify_summary(summary))
            .unwrap_or(DecisionState::Observe);

        Some(FallbackOutcome {
            state,
            confidence: best.score.clamp(0.0, 1.0),
            justification: format!(
                "Semantic recovery ({:.2}): mirroring decision {}: {}",
                best.score, best.id, summary
            ),
            reason: LlmReason::SemanticRecovery,
        })
    }

    /// Stage two: one structured LLM call, strict JSON contract.
    async fn invoke_llm(
        &self,
        llm: &dyn LlmProvider,
        prompt: &str,
    ) -> TriageResult<FallbackOutcome> {
        let text = llm.complete(prompt, &self.options).await?;
        parse_llm_reply(&text)
    }
}

fn cluster_summary_text(cluster: &AlertCluster) -> String {
    let descriptions: Vec<&str> = cluster
        .alerts
        .iter()
        .take(5)
        .map(|a| a.description.as_str())
        .collect();
    format!(
        "{} {} {}",
        cluster.primary_service,
        cluster.primary_severity,
        descriptions.join(" ")
    )
}

fn build_prompt(
    cluster: &AlertCluster,
    trends: &[MetricTrend],
    semantic_evidence: &[SemanticEvidence],
    rule_result: &RuleResult,
) -> String {
    let mut parts = vec![
        "You are an automated assistant that recommends an action for an alert.".to_string(),
        "Return only a JSON object with fields: state (CLOSE/OBSERVE/ESCALATE/MANUAL_REVIEW), \
         confidence (float 0.0-1.0), justification (short string)."
            .to_string(),
        String::new(),
        "# Alert Cluster Analysis".to_string(),
        format!("- Service: {}", cluster.primary_service),
        format!("- Severity: {}", cluster.primary_severity),
        format!("- Alert Count: {}", cluster.alert_count),
        format!("- Correlation Score: {:.2}", cluster.correlation_score),
        String::new(),
        "## Metric Trends".to_string(),
    ];

    for trend in trends {
        parts.push(format!(
            "- {}: {} (confidence {:.2})",
            trend.metric_name, trend.state, trend.confidence
        ));
    }

    if !semantic_evidence.is_empty() {
        parts.push(String::new());
        parts.push("## Historical Context".to_string());
        for evidence in semantic_evidence.iter().take(3) {
            parts.push(format!(
                "- ({:.2}) {}",
                evidence.similarity_score, evidence.summary
            ));
        }
    }

    parts.push(String::new());
    parts.push(format!(
        "## Current Rule Result\n- {}: {} (confidence {:.2})",
        rule_result.rule_id,
        rule_result
            .state
            .map_or_else(|| "none".to_string(), |s| s.to_string()),
        rule_result.confidence
    ));

    parts.join("\n")
}

/// Parse the strict `{state, confidence, justification}` contract out of an
/// LLM reply, tolerating surrounding prose.
fn parse_llm_reply(text: &str) -> TriageResult<FallbackOutcome> {
    let raw = JSON_OBJECT
        .find(text)
        .ok_or_else(|| crate::utils::error::TriageError::Parse {
            reason: "no JSON object in llm reply".to_string(),
        })?
        .as_str();

    let payload: serde_json::Value = serde_json::from_str(raw)?;

    let state_raw =
        payload["state"]
            .as_str()
            .ok_or_else(|| crate::utils::error::TriageError::Parse {
                reason: "llm reply missing state".to_string(),
            })?;
    let state =
        DecisionState::parse(state_raw).ok_or_else(|| crate::utils::error::TriageError::Parse {
            reason: format!("invalid state from llm: {state_raw}"),
        })?;

    let confidence = payload["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
    let justification = payload["justification"].as_str().unwrap_or("").to_string();

    Ok(FallbackOutcome {
        state,
        confidence,
        justification: format!("LLM: {justification}"),
        reason: LlmReason::LlmFallback,
    })
}

fn simulated_outcome(rule_justification: &str) -> FallbackOutcome {
    FallbackOutcome {
        state: DecisionState::ManualReview,
        confidence: 0.70,
        justification: format!(
            "Simulated LLM analysis: {rule_justification}. Recommend manual review."
        ),
        reason: LlmReason::LlmFallbackSimulated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::model::RawAlert;
    use crate::alerts::normalizer::AlertNormalizer;
    use crate::ports::llm::ScriptedProvider;
    use crate::ports::vector::{MemoryVectorStore, EMBEDDING_DIM};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::HashMap;

    fn cluster() -> AlertCluster {
        let alert = AlertNormalizer::new().normalize(&RawAlert {
            timestamp: Utc::now() - ChronoDuration::seconds(30),
            fingerprint: "fp".to_string(),
            service: "api".to_string(),
            severity: "warning".to_string(),
            description: "cpu saturation in api".to_string(),
            labels: HashMap::new(),
            source: "prometheus".to_string(),
        });
        AlertCluster::from_alerts(vec![alert], 0.7)
    }

    fn low_confidence_rule() -> RuleResult {
        let engine = crate::decision::rules::RuleEngine::default();
        let (result, _) = engine.evaluate(&cluster(), &[], &[]);
        result
    }

    #[tokio::test]
    async fn semantic_recovery_mirrors_history() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .ensure_collection(DECISION_COLLECTION, EMBEDDING_DIM)
            .await
            .unwrap();
        let vector = embed_text(&cluster_summary_text(&cluster()));
        store
            .upsert(
                DECISION_COLLECTION,
                "past-1",
                vector,
                serde_json::json!({"summary": "closed after auto-scale"}),
            )
            .await
            .unwrap();

        let resolver = FallbackResolver::new(Some(store), None, 0.60);
        let outcome = resolver
            .resolve(&cluster(), &[], &[], &low_confidence_rule())
            .await
            .expect("semantic outcome");
        assert_eq!(outcome.state, DecisionState::Close);
        assert_eq!(outcome.reason, LlmReason::SemanticRecovery);
        assert!(outcome.confidence > 0.9);
    }

    #[tokio::test]
    async fn llm_json_reply_is_parsed_and_validated() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            r#"Here you go: {"state": "ESCALATE", "confidence": 0.9, "justification": "saturation"}"#
                .to_string(),
        ]));
        let resolver = FallbackResolver::new(None, Some(llm), 0.60);
        let outcome = resolver
            .resolve(&cluster(), &[], &[], &low_confidence_rule())
            .await
            .expect("llm outcome");
        assert_eq!(outcome.state, DecisionState::Escalate);
        assert_eq!(outcome.reason, LlmReason::LlmFallback);
        assert!((outcome.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_state_synthesizes_manual_review() {
        let llm = Arc::new(ScriptedProvider::new(vec![
            r#"{"state": "PANIC", "confidence": 0.9, "justification": "???"}"#.to_string(),
        ]));
        let resolver = FallbackResolver::new(None, Some(llm), 0.60);
        let outcome = resolver
            .resolve(&cluster(), &[], &[], &low_confidence_rule())
            .await
            .expect("simulated outcome");
        assert_eq!(outcome.state, DecisionState::ManualReview);
        assert_eq!(outcome.reason, LlmReason::LlmFallbackSimulated);
        assert!((outcome.confidence - 0.70).abs() < 1e-9);
        assert!(outcome.justification.starts_with("Simulated LLM analysis:"));
    }

    #[tokio::test]
    async fn provider_failure_synthesizes_manual_review() {
        let llm = Arc::new(ScriptedProvider::default());
        let resolver = FallbackResolver::new(None, Some(llm), 0.60);
        let outcome = resolver
            .resolve(&cluster(), &[], &[], &low_confidence_rule())
            .await
            .expect("simulated outcome");
        assert_eq!(outcome.reason, LlmReason::LlmFallbackSimulated);
    }

    #[tokio::test]
    async fn no_ports_yields_no_outcome() {
        let resolver = FallbackResolver::new(None, None, 0.60);
        let outcome = resolver
            .resolve(&cluster(), &[], &[], &low_confidence_rule())
            .await;
        assert!(outcome.is_none());
    }
}
