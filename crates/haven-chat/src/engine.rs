use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    /// Lenient parse; unknown roles are treated as the user and tool output as
    /// the assistant.
    pub fn normalize(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "assistant" | "tool" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ChatRole::System => "System",
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Something that turns a conversation into the next assistant reply.
#[async_trait]
pub trait MessageEngine: Send + Sync {
    /// Short identifier used in logs and replies.
    fn id(&self) -> &'static str;

    /// Whether the engine runs against the on-device asset.
    fn is_local(&self) -> bool;

    async fn send(&self, history: &[ChatMessage]) -> Result<String, ChatError>;
}

/// Flatten a conversation into a plain completion prompt ending with an open
/// assistant turn.
pub fn render_prompt(history: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in history {
        out.push_str(message.role.label());
        out.push_str(": ");
        out.push_str(message.content.trim());
        out.push('\n');
    }
    out.push_str("Assistant:");
    out
}

pub(crate) fn last_user_prompt(history: &[ChatMessage]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.trim())
        .filter(|s| !s.is_empty())
}
