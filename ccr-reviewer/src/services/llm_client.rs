//! LLM provider client
//!
//! A prompt-in, text-out boundary. `AnthropicClient` speaks the Anthropic
//! Messages API; tests substitute their own `LlmClient`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmSettings;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("ccr-reviewer/", env!("CARGO_PKG_VERSION"));

/// Failures at the LLM boundary
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure: network, timeout, auth, overload
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    /// The model answered but the answer does not fit the expected shape
    #[error("LLM returned malformed response: {reason}")]
    MalformedResponse { reason: String, raw: String },
}

/// One blocking request/response exchange with a model
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a system + user prompt pair and return the model's text
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(settings: &LlmSettings, api_key: String) -> Result<Self, LlmError> {
        Self::with_timeout(settings, api_key, settings.timeout())
    }

    pub fn with_timeout(
        settings: &LlmSettings,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/v1/messages", settings.api_base.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system_prompt,
            messages: [Message {
                role: "user",
                content: user_prompt,
            }],
        };

        tracing::debug!(
            model = %self.model,
            prompt_chars = user_prompt.len(),
            "Sending request to LLM"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Unavailable(format!("request timed out: {}", e))
                } else {
                    LlmError::Unavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Unavailable(format!("reading response body failed: {}", e)))?;

        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), body));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::MalformedResponse {
                reason: format!("response envelope is not valid JSON: {}", e),
                raw: body.clone(),
            })?;

        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "LLM response truncated at max_tokens");
        }

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        tracing::debug!(response_chars = text.len(), "Received LLM response");
        Ok(text)
    }
}

/// Map a non-2xx status to the error taxonomy
///
/// A rejected request (400, 413) means the prompt itself cannot be served,
/// typically because it exceeds the context window. Everything else is a
/// transport or provider problem.
fn classify_http_failure(status: u16, body: String) -> LlmError {
    match status {
        400 | 413 | 422 => LlmError::MalformedResponse {
            reason: format!("request rejected with HTTP {}", status),
            raw: body,
        },
        _ => LlmError::Unavailable(format!("HTTP {}: {}", status, truncate(&body, 500))),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
