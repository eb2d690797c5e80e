//! HTTP surface: webhook intake, health, run status, metrics.
//!
//! The webhook always answers quickly: dedup preflight happens inline so a
//! racing delivery gets 429 or the existing run id, and the actual swarm
//! run happens on a spawned task. Long work never blocks the response.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dedup::DedupAction;
use crate::swarm::model::{RunStatus, TriggerAlert};
use crate::swarm::policy::DefaultConfidencePolicy;
use crate::AppState;

/// Build the service router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/alerts", post(receive_alerts))
        .route("/api/v1/health", get(health))
        .route("/api/v1/runs/:run_id", get(run_status))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    alerts: Vec<WebhookAlert>,
}

#[derive(Debug, Deserialize)]
struct WebhookAlert {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(rename = "startsAt")]
    starts_at: Option<DateTime<Utc>>,
    fingerprint: Option<String>,
}

impl WebhookAlert {
    /// Legacy Grafana payloads put description in annotations and
    /// service/severity in labels; labels win for identity fields.
    fn into_raw(self) -> crate::alerts::model::RawAlert {
        let description = self
            .annotations
            .get("description")
            .or_else(|| self.annotations.get("summary"))
            .or_else(|| self.labels.get("description"))
            .cloned()
            .unwrap_or_default();

        crate::alerts::model::RawAlert {
            timestamp: self.starts_at.unwrap_or_else(Utc::now),
            fingerprint: self.fingerprint.clone().unwrap_or_default(),
            service: self
                .labels
                .get("service")
                .or_else(|| self.labels.get("job"))
                .cloned()
                .unwrap_or_default(),
            severity: self.labels.get("severity").cloned().unwrap_or_default(),
            description,
            labels: self.labels,
            source: "alertmanager".to_string(),
        }
    }
}

async fn receive_alerts(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    if body.alerts.is_empty() {
        state.metrics.record_webhook("empty");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "no alerts in payload"})),
        );
    }

    let raw: Vec<crate::alerts::model::RawAlert> =
        body.alerts.into_iter().map(WebhookAlert::into_raw).collect();
    let normalized = state.normalizer.normalize_batch(&raw);
    let clusters = state.correlation.correlate(&normalized);

    let Some(primary) = clusters.first() else {
        state.metrics.record_webhook("empty");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "no correlatable alerts"})),
        );
    };

    let lead = &primary.alerts[0];
    let alert = TriggerAlert::new(
        if lead.fingerprint.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            lead.fingerprint.clone()
        },
        json!({
            "service": primary.primary_service,
            "severity": primary.primary_severity.to_string(),
            "source": lead.source,
            "description": lead.description,
            "alert_count": primary.alert_count,
            "correlation_score": primary.correlation_score,
        }),
    );

    // Dedup preflight so racing deliveries get a terminal answer without
    // waiting on the run itself.
    let lock_name = format!("swarm_run:{}", alert.alert_id);
    if !state.deduplicator.acquire_lock(&lock_name) {
        state.metrics.record_webhook("contended");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "run already in flight for this alert"})),
        );
    }
    let severity = alert.field("severity").unwrap_or("warning").to_string();
    let source = alert.field("source").unwrap_or("alertmanager").to_string();
    let (action, existing) =
        state
            .deduplicator
            .check_duplicate(&alert.alert_id, &alert.data, &severity, &source);
    state.deduplicator.release_lock(&lock_name);

    if action != DedupAction::New {
        state.metrics.record_webhook("duplicate");
        return (
            StatusCode::OK,
            Json(json!({"status": "duplicate", "run_id": existing})),
        );
    }

    // Surface a known procedure for this signature, if the ledger has one.
    let known_procedure = state
        .ledger
        .find_procedure_by_signature(&crate::ledger::alert_signature(&alert))
        .await
        .unwrap_or(None);

    let run_id = Uuid::new_v4().to_string();
    state.metrics.record_webhook("processing");
    info!(run_id = %run_id, alert_id = %alert.alert_id, "accepted webhook delivery");

    let task_state = state.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        task_state.processing.store(true, Ordering::Release);

        let result = task_state
            .coordinator
            .execute(
                task_state.domain.clone(),
                (*task_state.plan_template).clone(),
                alert,
                task_run_id.clone(),
                &DefaultConfidencePolicy::new(
                    task_state.config.confidence.penalty_override,
                    task_state.config.confidence.reinforcement_success,
                ),
                None,
                None,
                None,
            )
            .await;

        match result {
            Ok(outcome) => {
                info!(
                    run_id = %task_run_id,
                    status = ?outcome.run.status,
                    "webhook-triggered run finished"
                );
            }
            Err(err) => {
                error!(run_id = %task_run_id, error = %err, "webhook-triggered run failed");
            }
        }

        *task_state.last_execution.write().await = Some(Utc::now());
        task_state.processing.store(false, Ordering::Release);
    });

    (
        StatusCode::OK,
        Json(json!({
            "status": "processing",
            "run_id": run_id,
            "known_procedure": known_procedure,
        })),
    )
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ledger_ok = state.ledger.is_healthy().await;
    let last_execution = state
        .last_execution
        .read()
        .await
        .map(|ts| ts.to_rfc3339());

    Json(json!({
        "status": if ledger_ok { "ok" } else { "degraded" },
        "ledger_ok": ledger_ok,
        "processing": state.processing.load(Ordering::Acquire),
        "last_execution": last_execution,
    }))
}

async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(status) = state.coordinator.run_status(&run_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown run"})),
        );
    };

    let decision = if status.is_terminal() && status != RunStatus::DuplicateSkipped {
        match state.ledger.fetch_full_run_context(&run_id).await {
            Ok(context) => context
                .run
                .final_decision
                .map(|d| json!({
                    "decision_id": d.decision_id,
                    "state": d.state.to_string(),
                    "action_proposed": d.action_proposed,
                    "confidence": d.confidence,
                    "justification": d.justification,
                })),
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "run context unavailable");
                None
            }
        }
    } else {
        None
    };

    (
        StatusCode::OK,
        Json(json!({"run_id": run_id, "status": status, "decision": decision})),
    )
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.gather()
}

/// Serve the router on the configured address until shutdown.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "triage service listening");
    let router = build_router(state);
    axum::serve(listener, router).await?;
    Ok(())
}
