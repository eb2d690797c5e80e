//! Alert normalization and schema validation.
//!
//! Converts raw webhook alerts into the canonical [`NormalizedAlert`] form.
//! Validation failures mark the alert `Malformed` instead of dropping it;
//! the batch keeps its cardinality so every delivery is auditable.

use chrono::Utc;
use tracing::{debug, warn};

use crate::alerts::model::{NormalizedAlert, RawAlert, Severity, ValidationStatus};

/// Normalizes and validates incoming alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertNormalizer;

impl AlertNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Normalize a single alert, collecting validation errors.
    #[must_use]
    pub fn normalize(&self, alert: &RawAlert) -> NormalizedAlert {
        let mut errors = Vec::new();

        if alert.fingerprint.trim().is_empty() {
            errors.push("Missing or empty fingerprint".to_string());
        }
        if alert.service.trim().is_empty() {
            errors.push("Missing or empty service".to_string());
        }
        if alert.description.trim().is_empty() {
            errors.push("Missing or empty description".to_string());
        }

        let severity = match Severity::parse(&alert.severity) {
            Some(severity) => severity,
            None => {
                errors.push(format!("Invalid severity: {}", alert.severity));
                Severity::Info
            }
        };

        let now = Utc::now();
        if alert.timestamp > now {
            errors.push("Timestamp is in the future".to_string());
        }

        let status = if errors.is_empty() {
            ValidationStatus::Valid
        } else {
            warn!(
                fingerprint = %alert.fingerprint,
                errors = ?errors,
                "alert failed validation, marking malformed"
            );
            ValidationStatus::Malformed
        };

        NormalizedAlert {
            timestamp: alert.timestamp,
            fingerprint: alert.fingerprint.trim().to_string(),
            service: normalize_service(&alert.service),
            severity,
            description: alert.description.clone(),
            labels: alert.labels.clone(),
            source: alert.source.clone(),
            validation_status: status,
            validation_errors: if status == ValidationStatus::Malformed {
                Some(errors)
            } else {
                None
            },
            normalized_at: now,
        }
    }

    /// Normalize a batch. Output cardinality always equals input cardinality.
    #[must_use]
    pub fn normalize_batch(&self, alerts: &[RawAlert]) -> Vec<NormalizedAlert> {
        let normalized: Vec<NormalizedAlert> = alerts.iter().map(|a| self.normalize(a)).collect();
        let malformed = normalized.iter().filter(|a| !a.is_valid()).count();
        debug!(
            total = normalized.len(),
            malformed, "normalized alert batch"
        );
        normalized
    }
}

/// Canonical service name: lowercased, underscores hyphenated, trimmed.
fn normalize_service(service: &str) -> String {
    service.to_lowercase().replace('_', "-").trim().to_string()
}
