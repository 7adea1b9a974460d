//! Routes chat requests to the on-device engine or the network engine.
//!
//! An explicit `local` preference fails closed when the asset is not ready;
//! it never falls back to the network.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use haven_assets::{AssetManager, AssetStatus, LifecycleState};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::engine::{ChatMessage, MessageEngine};
use crate::error::{ChatError, SelectError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPreference {
    Local,
    Network,
    #[default]
    Auto,
}

impl ProviderPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderPreference::Local => "local",
            ProviderPreference::Network => "network",
            ProviderPreference::Auto => "auto",
        }
    }
}

impl fmt::Display for ProviderPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderPreference::Local),
            "network" | "remote" => Ok(ProviderPreference::Network),
            "auto" => Ok(ProviderPreference::Auto),
            other => Err(format!("unknown provider {other:?} (expected local, network or auto)")),
        }
    }
}

/// How `auto` resolves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPolicy {
    /// Always the network engine.
    #[default]
    Network,
    /// The local engine when the asset is ready, the network engine otherwise.
    PreferLocal,
}

/// Read access to the asset lifecycle status.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> AssetStatus;
}

impl StatusSource for AssetManager {
    fn status(&self) -> AssetStatus {
        self.state().status
    }
}

impl StatusSource for watch::Receiver<LifecycleState> {
    fn status(&self) -> AssetStatus {
        self.borrow().status
    }
}

/// A reply together with the engine that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub engine: &'static str,
    pub text: String,
}

pub struct ProviderSelector {
    status: Arc<dyn StatusSource>,
    local: Option<Arc<dyn MessageEngine>>,
    network: Option<Arc<dyn MessageEngine>>,
    auto_policy: AutoPolicy,
}

impl ProviderSelector {
    pub fn new(status: Arc<dyn StatusSource>) -> Self {
        Self {
            status,
            local: None,
            network: None,
            auto_policy: AutoPolicy::default(),
        }
    }

    pub fn with_local(mut self, engine: Arc<dyn MessageEngine>) -> Self {
        self.local = Some(engine);
        self
    }

    pub fn with_network(mut self, engine: Arc<dyn MessageEngine>) -> Self {
        self.network = Some(engine);
        self
    }

    pub fn auto_policy(mut self, policy: AutoPolicy) -> Self {
        self.auto_policy = policy;
        self
    }

    pub fn select(
        &self,
        preference: ProviderPreference,
    ) -> Result<Arc<dyn MessageEngine>, SelectError> {
        let selected = match preference {
            ProviderPreference::Local => self.local_engine(),
            ProviderPreference::Network => self.network_engine(),
            ProviderPreference::Auto => match self.auto_policy {
                AutoPolicy::Network => self.network_engine(),
                AutoPolicy::PreferLocal => self
                    .local_engine()
                    .or_else(|_| self.network_engine()),
            },
        }?;
        debug!(%preference, engine = selected.id(), "chat provider selected");
        Ok(selected)
    }

    pub async fn send(
        &self,
        preference: ProviderPreference,
        history: &[ChatMessage],
    ) -> Result<ChatReply, ChatError> {
        let engine = self.select(preference)?;
        let text = engine.send(history).await?;
        Ok(ChatReply {
            engine: engine.id(),
            text,
        })
    }

    fn local_engine(&self) -> Result<Arc<dyn MessageEngine>, SelectError> {
        let status = self.status.status();
        if status != AssetStatus::Ready {
            return Err(SelectError::LocalNotReady(status));
        }
        self.local.clone().ok_or(SelectError::LocalUnavailable)
    }

    fn network_engine(&self) -> Result<Arc<dyn MessageEngine>, SelectError> {
        self.network.clone().ok_or(SelectError::NetworkUnavailable)
    }
}
