use crate::utils::error::{TriageError, TriageResult};

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Configuration for the triage service.
///
/// Loaded from a TOML file with environment-variable overrides; every field
/// has a default so the service can start with no file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    pub server: ServerConfig,
    pub trend: TrendConfig,
    pub correlation: CorrelationConfig,
    pub decision: DecisionConfig,
    pub swarm: SwarmConfig,
    pub dedup: DedupConfig,
    pub confidence: ConfidenceConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Relative increase over the window classified as DEGRADING.
    pub degrading_threshold: f64,
    /// Relative decrease over the window classified as RECOVERING.
    pub recovering_threshold: f64,
    pub lookback_minutes: u64,
    pub step_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub window_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Rule confidence at which evaluation short-circuits.
    pub accept_threshold: f64,
    /// Rule confidence below which the fallback chain is consulted.
    pub llm_threshold: f64,
    /// Similarity required for semantic recovery to mirror a past decision.
    pub semantic_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub max_retry_rounds: u32,
    pub max_total_attempts: u32,
    pub max_runtime_seconds: u64,
    pub step_deadline_seconds: u64,
    pub use_llm_fallback: bool,
    pub llm_fallback_threshold: f64,
    pub llm_agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub ttl_seconds: u64,
    pub lock_lease_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub decay_rate: f64,
    pub penalty_override: f64,
    pub reinforcement_success: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider selector: "openai", "scripted", or "disabled".
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3001,
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            trend: TrendConfig {
                degrading_threshold: 0.15,
                recovering_threshold: 0.10,
                lookback_minutes: 15,
                step_seconds: 30,
            },
            correlation: CorrelationConfig { window_minutes: 5 },
            decision: DecisionConfig {
                accept_threshold: 0.60,
                llm_threshold: 0.60,
                semantic_threshold: 0.60,
            },
            swarm: SwarmConfig {
                max_retry_rounds: 10,
                max_total_attempts: 50,
                max_runtime_seconds: 3000,
                step_deadline_seconds: 30,
                use_llm_fallback: true,
                llm_fallback_threshold: 0.5,
                llm_agent_id: Some("llm_agent".to_string()),
            },
            dedup: DedupConfig {
                ttl_seconds: 300,
                lock_lease_seconds: 60,
            },
            confidence: ConfidenceConfig {
                decay_rate: 0.001,
                penalty_override: 0.10,
                reinforcement_success: 0.05,
            },
            llm: LlmConfig {
                provider: "disabled".to_string(),
                endpoint: None,
                model: "gpt-4o-mini".to_string(),
                api_key_env: "LLM_API_KEY".to_string(),
                temperature: 0.0,
                max_tokens: 512,
                request_timeout_seconds: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl TriageConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> TriageResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| TriageError::Configuration {
            reason: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| TriageError::Configuration {
            reason: format!("invalid TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then apply environment overrides.
    pub fn from_env() -> TriageResult<Self> {
        let mut config = match env::var("TRIAGE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = env::var("TRIAGE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("TRIAGE_PORT") {
            config.server.port = port.parse().map_err(|e| TriageError::Configuration {
                reason: format!("TRIAGE_PORT: {e}"),
            })?;
        }
        if let Ok(level) = env::var("TRIAGE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(provider) = env::var("TRIAGE_LLM_PROVIDER") {
            config.llm.provider = provider;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would violate core invariants.
    pub fn validate(&self) -> TriageResult<()> {
        for (name, value) in [
            ("decision.accept_threshold", self.decision.accept_threshold),
            ("decision.llm_threshold", self.decision.llm_threshold),
            ("decision.semantic_threshold", self.decision.semantic_threshold),
            ("swarm.llm_fallback_threshold", self.swarm.llm_fallback_threshold),
            ("confidence.decay_rate", self.confidence.decay_rate),
            ("confidence.penalty_override", self.confidence.penalty_override),
            (
                "confidence.reinforcement_success",
                self.confidence.reinforcement_success,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TriageError::Configuration {
                    reason: format!("{name} must be in [0,1], got {value}"),
                });
            }
        }

        if self.trend.degrading_threshold <= 0.0 || self.trend.recovering_threshold <= 0.0 {
            return Err(TriageError::Configuration {
                reason: "trend thresholds must be positive".to_string(),
            });
        }
        if self.swarm.max_retry_rounds == 0 || self.swarm.max_total_attempts == 0 {
            return Err(TriageError::Configuration {
                reason: "swarm bounds must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
