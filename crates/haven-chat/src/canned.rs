use async_trait::async_trait;

use crate::engine::{last_user_prompt, ChatMessage, MessageEngine};
use crate::error::ChatError;

const CHECKLIST: &[&str] = &[
    "Store at least three days of drinking water",
    "Pack non-perishable food and a manual can opener",
    "Charge power banks and check flashlight batteries",
    "Put copies of key documents in a waterproof bag",
    "Agree on a meeting point and an out-of-area contact",
];

/// Offline stand-in for the on-device model: answers every request with the
/// same starter checklist.
#[derive(Clone, Copy, Debug, Default)]
pub struct CannedEngine;

impl CannedEngine {
    pub fn reply_for(prompt: Option<&str>) -> String {
        let mut out = match prompt {
            Some(topic) => format!("Checklist for \"{topic}\":\n"),
            None => "Starter checklist:\n".to_string(),
        };
        for item in CHECKLIST {
            out.push_str("- [ ] ");
            out.push_str(item);
            out.push('\n');
        }
        out.truncate(out.trim_end().len());
        out
    }
}

#[async_trait]
impl MessageEngine for CannedEngine {
    fn id(&self) -> &'static str {
        "canned"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn send(&self, history: &[ChatMessage]) -> Result<String, ChatError> {
        Ok(Self::reply_for(last_user_prompt(history)))
    }
}
