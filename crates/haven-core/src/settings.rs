//! Effective runtime settings: the TOML config with the `HAVEN_*`
//! environment laid over it, resolved into the types the asset manager and
//! the chat selector take.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use haven_assets::{DownloadTuning, ManagerConfig, StaleMetadata, DEFAULT_METADATA_FILE};
use haven_chat::llama::DEFAULT_LLAMA_URL;
use haven_chat::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};
use haven_chat::{AutoPolicy, ProviderPreference};
use serde::Serialize;

use crate::config::{load_config, Config};
use crate::util::{env_string, expand_vars, parse_bool_flag};

pub const DEFAULT_CONFIG_REL: &str = "configs/default.toml";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
const MIB: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalBackend {
    #[default]
    Canned,
    Llama,
}

impl LocalBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "canned" => Ok(LocalBackend::Canned),
            "llama" | "llama.cpp" => Ok(LocalBackend::Llama),
            other => Err(anyhow!("unknown local backend {other:?} (expected canned or llama)")),
        }
    }
}

fn parse_auto_policy(raw: &str) -> Result<AutoPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "network" | "remote" => Ok(AutoPolicy::Network),
        "prefer_local" | "prefer-local" | "local" => Ok(AutoPolicy::PreferLocal),
        other => Err(anyhow!(
            "unknown auto policy {other:?} (expected network or prefer_local)"
        )),
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatSettings {
    pub provider: ProviderPreference,
    pub auto_policy: AutoPolicy,
    pub local_backend: LocalBackend,
    pub llama_url: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub system_prompt: String,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub portable: bool,
    pub asset_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub metadata_file: String,
    pub require_checksum: bool,
    pub stale_metadata: StaleMetadata,
    pub simulate: bool,
    pub download: DownloadTuning,
    /// Request timeout for chat engines.
    pub http_timeout: Duration,
    pub chat: ChatSettings,
}

impl Settings {
    /// Load the config file named by `HAVEN_CONFIG` (or the default one when
    /// it can be found) and apply the process environment.
    pub fn load() -> Result<Settings> {
        let (cfg, path) = match env_string("HAVEN_CONFIG") {
            Some(explicit) => {
                let path = PathBuf::from(expand_vars(&explicit));
                (load_config(&path)?, Some(path))
            }
            None => match resolve_config_path(DEFAULT_CONFIG_REL) {
                Some(path) => (load_config(&path)?, Some(path)),
                None => (Config::default(), None),
            },
        };
        let mut settings = Settings::resolve(&cfg, env_string)?;
        settings.config_path = path;
        Ok(settings)
    }

    /// Resolve settings from `cfg`, consulting `lookup` for `HAVEN_*`
    /// overrides. Environment values win over the file.
    pub fn resolve<F>(cfg: &Config, lookup: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str, file: Option<bool>| -> Result<bool> {
            match lookup(key) {
                Some(raw) => parse_bool_flag(&raw)
                    .ok_or_else(|| anyhow!("{key}: expected a boolean, got {raw:?}")),
                None => Ok(file.unwrap_or(false)),
            }
        };
        let number = |key: &str, file: Option<u64>| -> Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .with_context(|| format!("{key}: expected a number, got {raw:?}")),
                None => Ok(file),
            }
        };
        let text = |key: &str, file: &Option<String>| -> Option<String> {
            lookup(key).or_else(|| file.clone().filter(|s| !s.trim().is_empty()))
        };

        let portable = flag("HAVEN_PORTABLE", cfg.paths.portable)?;
        let (default_assets, default_logs) = default_dirs(portable);
        let asset_dir = text("HAVEN_ASSET_DIR", &cfg.paths.asset_dir)
            .map(|raw| PathBuf::from(expand_vars(&raw)))
            .unwrap_or(default_assets);
        let logs_dir = text("HAVEN_LOGS_DIR", &cfg.paths.logs_dir)
            .map(|raw| PathBuf::from(expand_vars(&raw)))
            .unwrap_or(default_logs);

        let metadata_file = text("HAVEN_METADATA_FILE", &cfg.assets.metadata_file)
            .unwrap_or_else(|| DEFAULT_METADATA_FILE.to_string());
        let require_checksum = flag("HAVEN_REQUIRE_CHECKSUM", cfg.assets.require_checksum)?;
        let stale_metadata = if flag("HAVEN_PURGE_STALE_METADATA", cfg.assets.purge_stale_metadata)? {
            StaleMetadata::Purge
        } else {
            StaleMetadata::Retain
        };
        let simulate = flag("HAVEN_SIMULATE", cfg.assets.simulate)?;

        let dl = &cfg.download;
        let defaults = DownloadTuning::default();
        let http_timeout_secs = number("HAVEN_DL_HTTP_TIMEOUT_SECS", dl.http_timeout_secs)?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
            .max(1);
        let idle_timeout = match number("HAVEN_DL_IDLE_TIMEOUT_SECS", dl.idle_timeout_secs)? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };
        let retries = |key: &str, file: Option<u32>, fallback: u32| -> Result<u32> {
            Ok(number(key, file.map(u64::from))?
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(fallback))
        };
        let download = DownloadTuning {
            idle_timeout,
            connect_timeout: Duration::from_secs(http_timeout_secs),
            send_retries: retries("HAVEN_DL_SEND_RETRIES", dl.send_retries, defaults.send_retries)?,
            stream_retries: retries(
                "HAVEN_DL_STREAM_RETRIES",
                dl.stream_retries,
                defaults.stream_retries,
            )?,
            retry_backoff_ms: number("HAVEN_DL_RETRY_BACKOFF_MS", dl.retry_backoff_ms)?
                .unwrap_or(defaults.retry_backoff_ms),
            max_bytes: number("HAVEN_DL_MAX_MB", dl.max_mb)?
                .filter(|mb| *mb > 0)
                .map(|mb| mb.saturating_mul(MIB)),
            disk_reserve_bytes: number("HAVEN_DL_DISK_RESERVE_MB", dl.disk_reserve_mb)?
                .unwrap_or(0)
                .saturating_mul(MIB),
        };

        let chat_cfg = &cfg.chat;
        let provider = match text("HAVEN_CHAT_PROVIDER", &chat_cfg.provider) {
            Some(raw) => raw.parse::<ProviderPreference>().map_err(|e| anyhow!(e))?,
            None => ProviderPreference::default(),
        };
        let auto_policy = match text("HAVEN_CHAT_AUTO_POLICY", &chat_cfg.auto_policy) {
            Some(raw) => parse_auto_policy(&raw)?,
            None => AutoPolicy::default(),
        };
        let local_backend = match text("HAVEN_LOCAL_BACKEND", &chat_cfg.local_backend) {
            Some(raw) => LocalBackend::parse(&raw)?,
            None => LocalBackend::default(),
        };
        let chat = ChatSettings {
            provider,
            auto_policy,
            local_backend,
            llama_url: text("HAVEN_LLAMA_URL", &chat_cfg.llama_url)
                .unwrap_or_else(|| DEFAULT_LLAMA_URL.to_string()),
            openai_base_url: text("HAVEN_OPENAI_BASE_URL", &chat_cfg.openai_base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            openai_model: text("HAVEN_OPENAI_MODEL", &chat_cfg.openai_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: text("HAVEN_CHAT_SYSTEM_PROMPT", &chat_cfg.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            openai_api_key: lookup("HAVEN_OPENAI_API_KEY"),
        };

        Ok(Settings {
            config_path: None,
            portable,
            asset_dir,
            logs_dir,
            metadata_file,
            require_checksum,
            stale_metadata,
            simulate,
            download,
            http_timeout: Duration::from_secs(http_timeout_secs),
            chat,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(&self.asset_dir)
            .metadata_file(self.metadata_file.clone())
            .require_checksum(self.require_checksum)
            .stale_metadata(self.stale_metadata)
    }

    /// Effective paths and switches, for `haven paths`.
    pub fn summary_json(&self) -> serde_json::Value {
        let norm = |p: &Path| p.to_string_lossy().replace('\\', "/");
        serde_json::json!({
            "config": self.config_path.as_deref().map(norm),
            "portable": self.portable,
            "assetDir": norm(&self.asset_dir),
            "logsDir": norm(&self.logs_dir),
            "metadataFile": self.metadata_file,
            "requireChecksum": self.require_checksum,
            "staleMetadata": self.stale_metadata,
            "simulate": self.simulate,
            "download": {
                "idleTimeoutSecs": self.download.idle_timeout_secs(),
                "connectTimeoutSecs": self.download.connect_timeout.as_secs(),
                "sendRetries": self.download.send_retries,
                "streamRetries": self.download.stream_retries,
                "retryBackoffMs": self.download.retry_backoff_ms,
                "maxBytes": self.download.max_bytes,
                "diskReserveBytes": self.download.disk_reserve_bytes,
            },
            "chat": self.chat,
            "openaiKeySet": self.chat.openai_api_key.is_some(),
        })
    }
}

/// Default asset and log directories. Portable mode keeps both next to the
/// executable; otherwise they live under the per-user data dir.
fn default_dirs(portable: bool) -> (PathBuf, PathBuf) {
    let base = if portable {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("data")))
    } else {
        directories::ProjectDirs::from("org", "haven", "haven")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
    };
    let base = base
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".haven")))
        .unwrap_or_else(|| PathBuf::from(".haven"));
    (base.join("assets"), base.join("logs"))
}

/// Resolve a config file path independent of the working directory.
///
/// Candidates, first existing wins: `HAVEN_CONFIG_DIR`, the executable's
/// directory and its parent, the workspace root in a dev checkout, then the
/// current directory. Absolute paths are returned only if they exist.
pub fn resolve_config_path(rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return rel_path.exists().then(|| rel_path.to_path_buf());
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = env_string("HAVEN_CONFIG_DIR") {
        candidates.push(PathBuf::from(dir));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            candidates.push(exe_dir.to_path_buf());
            if let Some(parent) = exe_dir.parent() {
                candidates.push(parent.to_path_buf());
            }
        }
    }
    candidates.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("../../"));
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }

    candidates
        .into_iter()
        .map(|base| base.join(rel))
        .find(|p| p.exists())
}
