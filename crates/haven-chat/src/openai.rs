//! Remote chat-completions engine.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::engine::{ChatMessage, ChatRole, MessageEngine};
use crate::error::ChatError;

const ENGINE: &str = "openai";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.2,
            max_tokens: 512,
            timeout: Duration::from_secs(20),
        }
    }
}

pub struct OpenAiEngine {
    client: reqwest::Client,
    endpoint: String,
    config: OpenAiConfig,
}

impl OpenAiEngine {
    pub fn new(config: OpenAiConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::http(ENGINE, e))?;
        let endpoint = format!(
            "{}/v1/chat/completions",
            config.base_url.trim().trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, history: &[ChatMessage]) -> Value {
        let mut messages = vec![json!({"role": "system", "content": self.config.system_prompt})];
        for message in history {
            if message.role == ChatRole::System {
                continue;
            }
            messages.push(json!({"role": message.role.as_str(), "content": message.content}));
        }
        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl MessageEngine for OpenAiEngine {
    fn id(&self) -> &'static str {
        ENGINE
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn send(&self, history: &[ChatMessage]) -> Result<String, ChatError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(history))
            .send()
            .await
            .map_err(|e| ChatError::http(ENGINE, e))?;
        let status = resp.status();
        if !status.is_success() {
            warn!(%status, "chat completion rejected");
            return Err(ChatError::Status {
                engine: ENGINE,
                status: status.as_u16(),
            });
        }
        let body: Value = resp.json().await.map_err(|e| ChatError::http(ENGINE, e))?;
        let reply = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(ChatError::EmptyReply(ENGINE));
        }
        debug!(model = %self.config.model, chars = reply.len(), "chat completion received");
        Ok(reply.to_string())
    }
}
