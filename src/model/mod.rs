//! Language model client.
//!
//! Defines the [`ModelClient`] trait the bridge talks to and
//! [`ChatCompletionClient`], an implementation for OpenAI-compatible
//! `chat/completions` endpoints (Groq by default).
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 503 (unavailable) → retry with backoff
//! - Any other non-success status → fail immediately
//! - Transport errors, including the request timeout → fail immediately
//! - Backoff: `base`, `2 × base`, `4 × base`, … up to `max_attempts` attempts
//!
//! A missing API key is reported as [`BridgeError::Config`] before any
//! request is sent.

pub mod retry;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::{BridgeError, BridgeResult};
use retry::{with_backoff, AttemptError, RetryPolicy, Sleeper, TokioSleeper};

/// One completion call: a system instruction, a user turn and a length cap.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Fail with [`BridgeError::Config`] when the client cannot make calls
    /// at all. Callers use it to stop before doing any other network work.
    fn ensure_configured(&self) -> BridgeResult<()> {
        Ok(())
    }

    /// Generate text for `request`. Returns the trimmed completion content.
    async fn complete(&self, request: &CompletionRequest) -> BridgeResult<String>;
}

/// Client for OpenAI-compatible chat-completion APIs.
pub struct ChatCompletionClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ChatCompletionClient {
    /// Build a client, reading the API key from the environment variable
    /// named by `config.api_key_env`. A missing key is not an error here; it
    /// surfaces on the first [`complete`](ModelClient::complete) call.
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(config, api_key)
    }

    pub fn new(config: &ModelConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            retry: config.retry_policy(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the clock used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn api_key(&self) -> BridgeResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            BridgeError::Config(format!(
                "model API key is not configured (set {})",
                self.api_key_env
            ))
        })
    }
}

#[async_trait]
impl ModelClient for ChatCompletionClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn ensure_configured(&self) -> BridgeResult<()> {
        self.api_key().map(|_| ())
    }

    async fn complete(&self, request: &CompletionRequest) -> BridgeResult<String> {
        let api_key = self.api_key()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
        });

        let http = &self.http;
        let url = self.url.as_str();
        let body = &body;

        with_backoff(&self.retry, self.sleeper.as_ref(), |attempt| async move {
            tracing::debug!(attempt = attempt + 1, url, "sending completion request");

            let response = http
                .post(url)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| AttemptError::Fatal(transport_error(e)))?;

            let status = response.status();
            if status.is_success() {
                let json: Value = response.json().await.map_err(|e| {
                    AttemptError::Fatal(BridgeError::Upstream(format!(
                        "model returned an unreadable body: {}",
                        e
                    )))
                })?;
                return extract_content(&json).map_err(AttemptError::Fatal);
            }

            let text = response.text().await.unwrap_or_default();
            let err = BridgeError::Upstream(format!("model API error {}: {}", status, text));
            if is_transient(status) {
                Err(AttemptError::Retryable(err))
            } else {
                Err(AttemptError::Fatal(err))
            }
        })
        .await
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn transport_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Upstream(format!("model request timed out: {}", e))
    } else {
        BridgeError::Upstream(format!("model request failed: {}", e))
    }
}

/// Pull `choices[0].message.content` out of a chat-completion response.
pub fn extract_content(json: &Value) -> BridgeResult<String> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Upstream("No valid response from model".to_string()))
}
