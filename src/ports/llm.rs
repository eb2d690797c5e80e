//! LLM completion port.
//!
//! The core needs exactly one operation from a language model:
//! `complete(prompt, options) -> text`. Concrete providers are selected by
//! configuration, never by type; the decision fallback only requires that
//! the returned text contain a JSON object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::utils::config::LlmConfig;
use crate::utils::error::{TriageError, TriageResult};

/// Options for a single completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

/// Completion port implemented by concrete providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> TriageResult<String>;
}

/// OpenAI-compatible chat-completions provider.
///
/// Works against any endpoint speaking the `/v1/chat/completions` shape;
/// the API key is read from the configured environment variable at call
/// time so a missing key surfaces as an `Auth` error, not a panic.
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> TriageResult<String> {
        let api_key = std::env::var(&self.api_key_env).map_err(|_| TriageError::Auth {
            reason: format!("missing API key in ${}", self.api_key_env),
        })?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        debug!(endpoint = %self.endpoint, model = %self.model, "llm completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = match status.as_u16() {
                401 | 403 => TriageError::Auth {
                    reason: format!("llm endpoint returned {status}"),
                },
                429 => TriageError::RateLimit {
                    reason: "llm endpoint returned 429".to_string(),
                },
                _ => TriageError::Network {
                    reason: format!("llm endpoint returned {status}"),
                },
            };
            warn!(%status, "llm completion failed");
            return Err(err);
        }

        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| TriageError::Parse {
                reason: "completion response missing choices[0].message.content".to_string(),
            })
    }
}

/// Deterministic provider fed from a queue of canned replies.
///
/// Used by tests and offline pipelines; an exhausted queue behaves like a
/// network failure so fallback paths are exercised realistically.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().await.push_back(reply.into());
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> TriageResult<String> {
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TriageError::Network {
                reason: "scripted provider has no replies queued".to_string(),
            })
    }
}

/// Select a provider from configuration; `disabled` yields `None`.
#[must_use]
pub fn provider_from_config(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => Some(Arc::new(OpenAiProvider::new(config))),
        "scripted" => Some(Arc::new(ScriptedProvider::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_pops_in_order() {
        let provider = ScriptedProvider::new(vec!["one".to_string(), "two".to_string()]);
        let options = CompletionOptions::default();
        assert_eq!(provider.complete("p", &options).await.unwrap(), "one");
        assert_eq!(provider.complete("p", &options).await.unwrap(), "two");
        assert!(provider.complete("p", &options).await.is_err());
    }

    #[test]
    fn disabled_config_yields_no_provider() {
        let config = LlmConfig {
            provider: "disabled".to_string(),
            endpoint: None,
            model: "m".to_string(),
            api_key_env: "NOPE".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            request_timeout_seconds: 5,
        };
        assert!(provider_from_config(&config).is_none());
    }
}
