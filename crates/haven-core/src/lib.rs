//! Host-side wiring for the haven asset manager: configuration, effective
//! paths and construction of the manager and chat selector.

pub mod bootstrap;
pub mod config;
pub mod settings;
pub mod util;

pub use bootstrap::{
    bootstrap, build_downloader, build_manager, build_selector, demo_asset, Runtime,
    DEMO_ASSET_BYTES, DEMO_ASSET_URL,
};
pub use config::{config_schema_json, load_config, parse_config, write_schema_file, Config};
pub use settings::{resolve_config_path, ChatSettings, LocalBackend, Settings};
