use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity as reported by monitoring sources.
///
/// Ordering follows escalation rank: `Critical > Warning > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Parse a raw severity string; unknown values map to `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "warning" => Some(Severity::Warning),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A raw alert as delivered by a monitoring webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAlert {
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub service: String,
    pub severity: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub source: String,
}

/// Validation outcome of normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    Malformed,
}

/// Canonical alert after validation and normalization.
///
/// Malformed alerts are retained with their errors rather than dropped, so
/// every delivery stays auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAlert {
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub service: String,
    pub severity: Severity,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub source: String,
    pub validation_status: ValidationStatus,
    pub validation_errors: Option<Vec<String>>,
    pub normalized_at: DateTime<Utc>,
}

impl NormalizedAlert {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_status == ValidationStatus::Valid
    }
}
