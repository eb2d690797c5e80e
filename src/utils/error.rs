use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for the triage service.
///
/// Kinds map directly onto the propagation policy: validation errors are
/// recorded on the alert and never abort a run, agent-call failures are
/// captured on the `AgentExecution` and fed to retry policies, contention on
/// the dedup lock surfaces as HTTP 429, and `Fatal` aborts the run with
/// partial state persisted.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum TriageError {
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Deadline exceeded after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Rate limited: {reason}")]
    RateLimit { reason: String },

    #[error("Parse error: {reason}")]
    Parse { reason: String },

    #[error("Retry budget exhausted for step {step_id}: {reason}")]
    Policy { step_id: String, reason: String },

    #[error("Circuit open for {upstream}")]
    CircuitOpen { upstream: String },

    #[error("Lock contention: {name}")]
    Contention { name: String },

    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Ledger error: {reason}")]
    Ledger { reason: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Invariant violated: {reason}")]
    Fatal { reason: String },
}

impl TriageError {
    /// Short kind tag used in execution records and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TriageError::Validation { .. } => "validation",
            TriageError::Timeout { .. } => "timeout",
            TriageError::Network { .. } => "network",
            TriageError::Auth { .. } => "auth",
            TriageError::RateLimit { .. } => "rate_limit",
            TriageError::Parse { .. } => "parse",
            TriageError::Policy { .. } => "policy",
            TriageError::CircuitOpen { .. } => "circuit_open",
            TriageError::Contention { .. } => "contention",
            TriageError::AgentNotFound { .. } => "agent_not_found",
            TriageError::Configuration { .. } => "configuration",
            TriageError::Ledger { .. } => "ledger",
            TriageError::RunNotFound { .. } => "run_not_found",
            TriageError::Fatal { .. } => "fatal",
        }
    }

    /// Transient kinds are the ones a retry policy may act on.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::Timeout { .. }
                | TriageError::Network { .. }
                | TriageError::RateLimit { .. }
                | TriageError::Parse { .. }
                | TriageError::CircuitOpen { .. }
        )
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TriageError::Timeout {
                operation: "http request".to_string(),
                seconds: 0,
            }
        } else if err.status().map_or(false, |s| s.as_u16() == 429) {
            TriageError::RateLimit {
                reason: err.to_string(),
            }
        } else if err
            .status()
            .map_or(false, |s| s.as_u16() == 401 || s.as_u16() == 403)
        {
            TriageError::Auth {
                reason: err.to_string(),
            }
        } else {
            TriageError::Network {
                reason: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for TriageError {
    fn from(err: std::io::Error) -> Self {
        TriageError::Configuration {
            reason: err.to_string(),
        }
    }
}

pub type TriageResult<T> = Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = TriageError::Timeout {
            operation: "agent".to_string(),
            seconds: 30,
        };
        assert_eq!(err.kind(), "timeout");
        assert!(err.is_transient());

        let err = TriageError::Fatal {
            reason: "broken".to_string(),
        };
        assert_eq!(err.kind(), "fatal");
        assert!(!err.is_transient());
    }

    #[test]
    fn contention_is_not_transient() {
        let err = TriageError::Contention {
            name: "swarm_run:abc".to_string(),
        };
        assert!(!err.is_transient());
    }
}
