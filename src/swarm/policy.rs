//! Retry and confidence policies.
//!
//! Policies are behavior ports identified by `{name, version, logic_hash}`
//! so audited retry decisions can be tied to the exact logic that made
//! them and reconstructed for replay through the resolver, never by
//! deserializing code.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Context handed to a retry policy for one decision.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub run_id: String,
    pub step_id: String,
    pub agent_id: String,
    /// 1-based attempt number of the execution that just failed.
    pub attempt: u32,
    pub error: String,
    /// Deterministic seed: `master_seed + attempt`.
    pub random_seed: u64,
    pub last_confidence: f64,
    pub domain_hints: Vec<String>,
}

/// Retry policy port.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn logic_hash(&self) -> &str;

    /// Whether the failed step should be tried again.
    fn should_retry(&self, ctx: &RetryContext) -> bool;

    /// Delay in seconds before the next attempt.
    fn next_delay(&self, ctx: &RetryContext) -> f64;
}

/// Stable digest over a policy's identity and parameters.
#[must_use]
pub fn policy_logic_hash(name: &str, version: &str, params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(version.as_bytes());
    hasher.update(params.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Canonical exponential backoff: `min(base · 2^(attempt−1), max)` with
/// ±20% jitter drawn from the context seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoffPolicy {
    pub max_attempts: u32,
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    #[serde(skip)]
    logic_hash: String,
}

impl ExponentialBackoffPolicy {
    pub const NAME: &'static str = "exponential_backoff";
    pub const VERSION: &'static str = "1.0";

    #[must_use]
    pub fn new(max_attempts: u32, base_delay_seconds: f64, max_delay_seconds: f64) -> Self {
        let params = serde_json::json!({
            "max_attempts": max_attempts,
            "base_delay_seconds": base_delay_seconds,
            "max_delay_seconds": max_delay_seconds,
        });
        Self {
            max_attempts,
            base_delay_seconds,
            max_delay_seconds,
            logic_hash: policy_logic_hash(Self::NAME, Self::VERSION, &params),
        }
    }

    #[must_use]
    pub fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "max_attempts": self.max_attempts,
            "base_delay_seconds": self.base_delay_seconds,
            "max_delay_seconds": self.max_delay_seconds,
        })
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::new(3, 1.0, 60.0)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn logic_hash(&self) -> &str {
        &self.logic_hash
    }

    fn should_retry(&self, ctx: &RetryContext) -> bool {
        ctx.attempt < self.max_attempts
    }

    fn next_delay(&self, ctx: &RetryContext) -> f64 {
        let exponent = ctx.attempt.saturating_sub(1).min(32);
        let raw = self.base_delay_seconds * 2f64.powi(exponent as i32);
        let capped = raw.min(self.max_delay_seconds);

        let mut rng = StdRng::seed_from_u64(ctx.random_seed);
        let jitter: f64 = rng.gen_range(-0.2..=0.2);
        (capped * (1.0 + jitter)).max(0.0)
    }
}

/// Confidence policy port: penalty and reinforcement magnitudes.
pub trait ConfidencePolicy: Send + Sync + std::fmt::Debug {
    fn penalty_for_override(&self) -> f64;
    fn reinforcement_for_success(&self) -> f64;
}

/// Defaults: 0.10 penalty, 0.05 reinforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfidencePolicy {
    pub penalty_override: f64,
    pub reinforcement_success: f64,
}

impl Default for DefaultConfidencePolicy {
    fn default() -> Self {
        Self {
            penalty_override: 0.10,
            reinforcement_success: 0.05,
        }
    }
}

impl DefaultConfidencePolicy {
    #[must_use]
    pub fn new(penalty_override: f64, reinforcement_success: f64) -> Self {
        Self {
            penalty_override: penalty_override.clamp(0.0, 1.0),
            reinforcement_success: reinforcement_success.clamp(0.0, 1.0),
        }
    }
}

impl ConfidencePolicy for DefaultConfidencePolicy {
    fn penalty_for_override(&self) -> f64 {
        self.penalty_override
    }

    fn reinforcement_for_success(&self) -> f64 {
        self.reinforcement_success
    }
}

/// Rebuild a retry policy from its audited identity and parameters.
///
/// Replay reconstructs policies through this resolver; unknown names are an
/// audit-integrity failure surfaced to the caller.
#[must_use]
pub fn resolve_retry_policy(
    name: &str,
    params: &serde_json::Value,
) -> Option<Arc<dyn RetryPolicy>> {
    match name {
        ExponentialBackoffPolicy::NAME => {
            let max_attempts = params["max_attempts"].as_u64().unwrap_or(3) as u32;
            let base = params["base_delay_seconds"].as_f64().unwrap_or(1.0);
            let max = params["max_delay_seconds"].as_f64().unwrap_or(60.0);
            Some(Arc::new(ExponentialBackoffPolicy::new(max_attempts, base, max)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(attempt: u32, seed: u64) -> RetryContext {
        RetryContext {
            run_id: "run".to_string(),
            step_id: "step".to_string(),
            agent_id: "agent".to_string(),
            attempt,
            error: "network flake".to_string(),
            random_seed: seed,
            last_confidence: 1.0,
            domain_hints: Vec::new(),
        }
    }

    #[test]
    fn retries_until_max_attempts() {
        let policy = ExponentialBackoffPolicy::new(3, 0.1, 10.0);
        assert!(policy.should_retry(&ctx(1, 7)));
        assert!(policy.should_retry(&ctx(2, 7)));
        assert!(!policy.should_retry(&ctx(3, 7)));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = ExponentialBackoffPolicy::new(10, 1.0, 4.0);
        // Jitter is ±20%, so compare against the pre-jitter value bounds.
        let d1 = policy.next_delay(&ctx(1, 42));
        let d3 = policy.next_delay(&ctx(3, 42));
        let d6 = policy.next_delay(&ctx(6, 42));
        assert!(d1 >= 0.8 && d1 <= 1.2);
        assert!(d3 >= 3.2 && d3 <= 4.8);
        // attempt 6 pre-jitter is 32 but capped at 4.
        assert!(d6 >= 3.2 && d6 <= 4.8);
    }

    #[test]
    fn same_seed_gives_same_delay() {
        let policy = ExponentialBackoffPolicy::default();
        assert_eq!(policy.next_delay(&ctx(2, 99)), policy.next_delay(&ctx(2, 99)));
        assert_ne!(policy.next_delay(&ctx(2, 99)), policy.next_delay(&ctx(2, 100)));
    }

    #[test]
    fn logic_hash_tracks_parameters() {
        let a = ExponentialBackoffPolicy::new(3, 1.0, 60.0);
        let b = ExponentialBackoffPolicy::new(3, 1.0, 60.0);
        let c = ExponentialBackoffPolicy::new(5, 1.0, 60.0);
        assert_eq!(a.logic_hash(), b.logic_hash());
        assert_ne!(a.logic_hash(), c.logic_hash());
    }

    #[test]
    fn resolver_round_trips_backoff_policy() {
        let original = ExponentialBackoffPolicy::new(4, 0.5, 30.0);
        let resolved = resolve_retry_policy(ExponentialBackoffPolicy::NAME, &original.params())
            .expect("known policy");
        assert_eq!(resolved.logic_hash(), original.logic_hash());
        assert!(resolve_retry_policy("mystery", &serde_json::json!({})).is_none());
    }

    #[test]
    fn default_confidence_policy_magnitudes() {
        let policy = DefaultConfidencePolicy::default();
        assert_eq!(policy.penalty_for_override(), 0.10);
        assert_eq!(policy.reinforcement_for_success(), 0.05);
    }
}
