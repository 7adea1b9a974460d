use std::sync::Arc;

use anyhow::{Context, Result};
use haven_assets::{AssetManager, Downloader, HttpDownloader, SimulatedDownloader};
use haven_chat::{
    CannedEngine, LlamaEngine, MessageEngine, OpenAiConfig, OpenAiEngine, ProviderSelector,
};
use tracing::{debug, info};

use crate::settings::{LocalBackend, Settings};

/// URL served by the simulated downloader.
pub const DEMO_ASSET_URL: &str = "https://example.com/model.bin";
pub const DEMO_ASSET_BYTES: usize = 100_000;

/// Deterministic stand-in payload for [`DEMO_ASSET_URL`].
pub fn demo_asset() -> Vec<u8> {
    (0..DEMO_ASSET_BYTES).map(|i| (i % 251) as u8).collect()
}

pub fn build_downloader(settings: &Settings) -> Result<Arc<dyn Downloader>> {
    if settings.simulate {
        debug!(url = DEMO_ASSET_URL, "using simulated downloader");
        return Ok(Arc::new(
            SimulatedDownloader::new().with_asset(DEMO_ASSET_URL, demo_asset()),
        ));
    }
    let http = HttpDownloader::new(settings.download).context("build http downloader")?;
    Ok(Arc::new(http))
}

pub fn build_manager(settings: &Settings, downloader: Arc<dyn Downloader>) -> Result<AssetManager> {
    AssetManager::new(settings.manager_config(), downloader)
        .with_context(|| format!("open asset dir {}", settings.asset_dir.display()))
}

pub fn build_selector(settings: &Settings, manager: &AssetManager) -> Result<ProviderSelector> {
    let chat = &settings.chat;
    let local: Arc<dyn MessageEngine> = match chat.local_backend {
        LocalBackend::Canned => Arc::new(CannedEngine),
        LocalBackend::Llama => Arc::new(
            LlamaEngine::new(&chat.llama_url, settings.http_timeout)
                .context("build llama engine")?,
        ),
    };
    let mut selector = ProviderSelector::new(Arc::new(manager.clone()))
        .with_local(local)
        .auto_policy(chat.auto_policy);

    match chat.openai_api_key.as_deref() {
        Some(key) => {
            let mut config = OpenAiConfig::new(key);
            config.base_url = chat.openai_base_url.clone();
            config.model = chat.openai_model.clone();
            config.system_prompt = chat.system_prompt.clone();
            config.timeout = settings.http_timeout;
            let engine = OpenAiEngine::new(config).context("build openai engine")?;
            selector = selector.with_network(Arc::new(engine));
        }
        None => debug!("no openai key configured; network chat disabled"),
    }
    Ok(selector)
}

/// Wired components for one host process.
pub struct Runtime {
    pub settings: Settings,
    pub manager: AssetManager,
    pub selector: ProviderSelector,
}

/// Build the manager and selector and reconcile the asset state with disk.
pub async fn bootstrap(settings: Settings) -> Result<Runtime> {
    let downloader = build_downloader(&settings)?;
    let manager = build_manager(&settings, downloader)?;
    let state = manager.init().await.context("initialize asset state")?;
    info!(
        dir = %settings.asset_dir.display(),
        downloader = manager.downloader_kind(),
        status = %state.status,
        "asset manager ready"
    );
    let selector = build_selector(&settings, &manager)?;
    Ok(Runtime {
        settings,
        manager,
        selector,
    })
}
