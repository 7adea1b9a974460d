//! Engine backed by a llama.cpp-style completion server running the
//! installed model.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::engine::{render_prompt, ChatMessage, MessageEngine};
use crate::error::ChatError;

const ENGINE: &str = "llama";
pub const DEFAULT_LLAMA_URL: &str = "http://127.0.0.1:8080";

pub struct LlamaEngine {
    client: reqwest::Client,
    endpoint: String,
    n_predict: u32,
    temperature: f32,
}

impl LlamaEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::http(ENGINE, e))?;
        Ok(Self {
            client,
            endpoint: format!("{}/completion", base_url.trim().trim_end_matches('/')),
            n_predict: 256,
            temperature: 0.2,
        })
    }

    pub fn n_predict(mut self, tokens: u32) -> Self {
        self.n_predict = tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl MessageEngine for LlamaEngine {
    fn id(&self) -> &'static str {
        ENGINE
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn send(&self, history: &[ChatMessage]) -> Result<String, ChatError> {
        let body = json!({
            "prompt": render_prompt(history),
            "n_predict": self.n_predict,
            "cache_prompt": true,
            "temperature": self.temperature,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::http(ENGINE, e))?;
        let status = resp.status();
        if !status.is_success() {
            warn!(%status, "local completion rejected");
            return Err(ChatError::Status {
                engine: ENGINE,
                status: status.as_u16(),
            });
        }
        let value: Value = resp.json().await.map_err(|e| ChatError::http(ENGINE, e))?;
        let reply = value
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(ChatError::EmptyReply(ENGINE));
        }
        Ok(reply.to_string())
    }
}
