//! Chat engines and the selector that decides whether a request may run on
//! the on-device model.

mod canned;
mod engine;
mod error;
pub mod llama;
pub mod openai;
pub mod selector;

pub use canned::CannedEngine;
pub use engine::{render_prompt, ChatMessage, ChatRole, MessageEngine};
pub use error::{ChatError, SelectError};
pub use llama::LlamaEngine;
pub use openai::{OpenAiConfig, OpenAiEngine};
pub use selector::{AutoPolicy, ChatReply, ProviderPreference, ProviderSelector, StatusSource};
