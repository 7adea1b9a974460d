//! Lifecycle management for a single locally-resident model asset: fetch it,
//! verify it, record it, and remove it.

mod counters;
pub mod download;
mod error;
pub mod http;
pub mod manager;
pub mod metadata;
pub mod simulated;
pub mod storage;
pub mod verify;

pub use counters::DownloadCounters;
pub use download::{
    redact_url, CompletedTransfer, DownloadHandle, DownloadTuning, Downloader, ProgressFn,
    TransferRequest,
};
pub use error::AssetError;
pub use http::HttpDownloader;
pub use manager::{AssetManager, AssetStatus, LifecycleState, ManagerConfig, StaleMetadata};
pub use metadata::{AssetMetadata, AssetSpec, MetadataStore, DEFAULT_METADATA_FILE};
pub use simulated::SimulatedDownloader;
pub use storage::{AssetStorage, FileStat};
pub use verify::{sha256_file, IntegrityVerifier, Verification};
