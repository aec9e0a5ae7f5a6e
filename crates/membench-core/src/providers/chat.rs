use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;

/// OpenAI-compatible `/chat/completions` client. Rate limits are retried
/// with the configured policy; everything else fails on the first attempt.
pub struct ChatClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: &LlmConfig, model: &str, retry: RetryPolicy) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarnessError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            model: model.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry,
            client,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the first choice's content.
    pub async fn complete(&self, messages: &[Value]) -> HarnessResult<String> {
        self.retry.run(|| self.complete_once(messages)).await
    }

    async fn complete_once(&self, messages: &[Value]) -> HarnessResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            return Err(HarnessError::RateLimited {
                message: format!("chat API rate limited: {text}"),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(HarnessError::Service {
                message: format!("chat API error: {text}"),
                status: Some(status.as_u16()),
            });
        }

        let json: Value = resp.json().await?;
        debug!(model = %self.model, usage = %json["usage"], "chat completion");
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Service {
                message: "chat API response missing content".into(),
                status: Some(status.as_u16()),
            })
    }
}
