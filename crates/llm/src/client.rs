//! OpenAI-compatible chat-completions client.

use crate::ChatModel;
use async_trait::async_trait;
use mailflow_core::config::LlmConfig;
use mailflow_core::{MailflowError, MailflowResult};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    /// Build a client from configuration. The per-call request timeout is
    /// applied at the HTTP client level.
    pub fn new(config: &LlmConfig) -> MailflowResult<Self> {
        if config.api_key.is_empty() {
            return Err(MailflowError::Configuration(
                "LLM API key is not configured (MAILFLOW__LLM__API_KEY)".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MailflowError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, body: &serde_json::Value) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> MailflowResult<String> {
        let body = json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        // Single retry on transient network failure, no backoff.
        let response = match self.request(&body).await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!(error = %e, "LLM call failed transiently, retrying once");
                self.request(&body).await.map_err(|e| {
                    MailflowError::ExternalService(format!("LLM request failed after retry: {e}"))
                })?
            }
            Err(e) => {
                return Err(MailflowError::ExternalService(format!(
                    "LLM request failed: {e}"
                )))
            }
        };

        let status = response.status();
        let payload = response.text().await.map_err(|e| {
            MailflowError::ExternalService(format!("LLM response read failed: {e}"))
        })?;
        if !status.is_success() {
            return Err(MailflowError::ExternalService(format!(
                "LLM returned {}: {}",
                status,
                truncate(&payload, 300)
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&payload)?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MailflowError::ExternalService("LLM response missing message content".into())
            })?;
        debug!(model = %self.model, chars = content.len(), "LLM completion received");
        Ok(content.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
