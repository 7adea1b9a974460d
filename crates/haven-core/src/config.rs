use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PathsConfig {
    /// Keep data next to the executable instead of the per-user data dir.
    #[serde(default)]
    pub portable: Option<bool>,
    /// Managed asset directory.
    #[serde(default)]
    pub asset_dir: Option<String>,
    #[serde(default)]
    pub logs_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct AssetsConfig {
    /// Descriptor file name inside the asset directory (default `model-meta.json`).
    #[serde(default)]
    pub metadata_file: Option<String>,
    /// Fail verification when the descriptor carries no sha256.
    #[serde(default)]
    pub require_checksum: Option<bool>,
    /// Remove the descriptor when the asset it names fails verification.
    #[serde(default)]
    pub purge_stale_metadata: Option<bool>,
    /// Serve downloads from the built-in simulated catalog.
    #[serde(default)]
    pub simulate: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct DownloadConfig {
    /// Seconds without data before a transfer fails; 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub send_retries: Option<u32>,
    #[serde(default)]
    pub stream_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    /// Connect timeout for downloads and request timeout for chat engines.
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    /// Largest accepted asset in MiB; 0 disables.
    #[serde(default)]
    pub max_mb: Option<u64>,
    /// Free space to leave on the volume, in MiB.
    #[serde(default)]
    pub disk_reserve_mb: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ChatConfig {
    /// `local`, `network` or `auto`.
    #[serde(default)]
    pub provider: Option<String>,
    /// `network` (default) or `prefer_local`.
    #[serde(default)]
    pub auto_policy: Option<String>,
    /// `canned` (default) or `llama`.
    #[serde(default)]
    pub local_backend: Option<String>,
    #[serde(default)]
    pub llama_url: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema_value = config_schema_json();
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn write_schema_file(path: &Path) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}

/// Parse TOML config text, checking it against the schema first.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content).context("parse config toml")?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}
