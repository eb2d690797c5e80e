//! Deterministic alert correlation.
//!
//! Groups normalized alerts into clusters that describe one underlying
//! incident. Two passes over the timestamp-sorted batch: an exact
//! fingerprint pass first, then a service + time-window pass over whatever
//! the first pass left ungrouped.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::alerts::model::{NormalizedAlert, Severity};

/// A group of alerts deemed to describe one incident; the unit of decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCluster {
    pub cluster_id: Uuid,
    pub alerts: Vec<NormalizedAlert>,
    pub correlation_score: f64,
    pub created_at: DateTime<Utc>,
    pub primary_service: String,
    pub primary_severity: Severity,
    pub alert_count: usize,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AlertCluster {
    /// Build a cluster from a non-empty alert group.
    ///
    /// `primary_service` is the modal service (lexicographic tie-break);
    /// `primary_severity` the maximum severity rank.
    #[must_use]
    pub fn from_alerts(alerts: Vec<NormalizedAlert>, correlation_score: f64) -> Self {
        debug_assert!(!alerts.is_empty(), "cluster requires at least one alert");

        let mut service_counts: HashMap<&str, usize> = HashMap::new();
        for alert in &alerts {
            *service_counts.entry(alert.service.as_str()).or_insert(0) += 1;
        }
        let primary_service = service_counts
            .iter()
            .max_by(|(a_svc, a_n), (b_svc, b_n)| a_n.cmp(b_n).then(b_svc.cmp(a_svc)))
            .map(|(svc, _)| (*svc).to_string())
            .unwrap_or_default();

        let primary_severity = alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Info);

        let alert_count = alerts.len();

        Self {
            cluster_id: Uuid::new_v4(),
            alerts,
            correlation_score: correlation_score.clamp(0.0, 1.0),
            created_at: Utc::now(),
            primary_service,
            primary_severity,
            alert_count,
            metadata: HashMap::new(),
        }
    }

    /// Seconds between the earliest and latest alert in the cluster.
    #[must_use]
    pub fn time_span_seconds(&self) -> i64 {
        let timestamps: Vec<DateTime<Utc>> = self.alerts.iter().map(|a| a.timestamp).collect();
        match (timestamps.iter().min(), timestamps.iter().max()) {
            (Some(min), Some(max)) => (*max - *min).num_seconds(),
            _ => 0,
        }
    }
}

/// Configuration for the correlation passes.
#[derive(Debug, Clone)]
pub struct CorrelationSettings {
    pub time_window: Duration,
    pub group_by_fingerprint: bool,
    pub group_by_service: bool,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            time_window: Duration::minutes(5),
            group_by_fingerprint: true,
            group_by_service: true,
        }
    }
}

impl CorrelationSettings {
    #[must_use]
    pub fn with_window_minutes(minutes: u64) -> Self {
        Self {
            time_window: Duration::minutes(minutes as i64),
            ..Self::default()
        }
    }
}

/// Deterministic engine for grouping related alerts.
#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    settings: CorrelationSettings,
}

impl CorrelationEngine {
    #[must_use]
    pub fn new(settings: CorrelationSettings) -> Self {
        Self { settings }
    }

    /// Group alerts into correlated clusters.
    ///
    /// Every input alert lands in exactly one cluster. Output order is
    /// deterministic for a given input (fingerprint clusters in first-seen
    /// order, then service clusters in first-seen order).
    #[must_use]
    pub fn correlate(&self, alerts: &[NormalizedAlert]) -> Vec<AlertCluster> {
        if alerts.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<NormalizedAlert> = alerts.to_vec();
        sorted.sort_by_key(|a| a.timestamp);

        let mut clusters = Vec::new();
        let mut leftovers: Vec<NormalizedAlert> = Vec::new();

        if self.settings.group_by_fingerprint {
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<NormalizedAlert>> = HashMap::new();
            for alert in sorted {
                if !groups.contains_key(&alert.fingerprint) {
                    order.push(alert.fingerprint.clone());
                }
                groups.entry(alert.fingerprint.clone()).or_default().push(alert);
            }

            for fingerprint in order {
                let group = groups.remove(&fingerprint).unwrap_or_default();
                if group.len() >= 2 || !self.settings.group_by_service {
                    let score = fingerprint_score(&group);
                    clusters.push(AlertCluster::from_alerts(group, score));
                } else {
                    leftovers.extend(group);
                }
            }
        } else {
            leftovers = sorted;
        }

        if self.settings.group_by_service {
            clusters.extend(self.correlate_by_service(leftovers));
        }

        info!(
            alerts = alerts.len(),
            clusters = clusters.len(),
            "correlated alert batch"
        );
        clusters
    }

    /// Service + time-window pass. A gap above the window closes the open
    /// group for that service and opens a fresh one.
    fn correlate_by_service(&self, alerts: Vec<NormalizedAlert>) -> Vec<AlertCluster> {
        let mut finished: Vec<Vec<NormalizedAlert>> = Vec::new();
        let mut open: HashMap<String, Vec<NormalizedAlert>> = HashMap::new();
        let mut open_order: Vec<String> = Vec::new();

        for alert in alerts {
            let service = alert.service.clone();
            match open.get_mut(&service) {
                Some(group) => {
                    let last = group.last().expect("open group is never empty");
                    if alert.timestamp - last.timestamp <= self.settings.time_window {
                        group.push(alert);
                    } else {
                        debug!(service = %service, "time window exceeded, opening new group");
                        finished.push(std::mem::replace(group, vec![alert]));
                    }
                }
                None => {
                    open_order.push(service.clone());
                    open.insert(service, vec![alert]);
                }
            }
        }

        for service in open_order {
            if let Some(group) = open.remove(&service) {
                finished.push(group);
            }
        }

        finished
            .into_iter()
            .map(|group| {
                let score = service_score(&group);
                AlertCluster::from_alerts(group, score)
            })
            .collect()
    }
}

/// Same fingerprint is near-certain correlation: 0.9 base plus a temporal
/// bonus, 1.0 for a singleton.
fn fingerprint_score(alerts: &[NormalizedAlert]) -> f64 {
    if alerts.len() <= 1 {
        return 1.0;
    }
    let span = span_seconds(alerts);
    let bonus: f64 = if span <= 300 { 0.1 } else { 0.05 };
    (0.9_f64 + bonus).min(1.0)
}

/// Same service within the window is moderate correlation: 0.6 base plus
/// severity-consistency and tightness bonuses, capped at 0.85; singleton 0.7.
fn service_score(alerts: &[NormalizedAlert]) -> f64 {
    if alerts.len() <= 1 {
        return 0.7;
    }

    let mut score: f64 = 0.6;
    let first_severity = alerts[0].severity;
    if alerts.iter().all(|a| a.severity == first_severity) {
        score += 0.1;
    }
    if span_seconds(alerts) <= 180 {
        score += 0.1;
    }
    score.min(0.85)
}

fn span_seconds(alerts: &[NormalizedAlert]) -> i64 {
    let min = alerts.iter().map(|a| a.timestamp).min();
    let max = alerts.iter().map(|a| a.timestamp).max();
    match (min, max) {
        (Some(min), Some(max)) => (max - min).num_seconds(),
        _ => 0,
    }
}
