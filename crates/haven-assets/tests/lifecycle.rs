use std::sync::Arc;
use std::time::Duration;

use haven_assets::{
    AssetError, AssetManager, AssetSpec, AssetStatus, ManagerConfig, MetadataStore,
    SimulatedDownloader, StaleMetadata, DEFAULT_METADATA_FILE,
};
use tempfile::{tempdir, TempDir};

const URL: &str = "https://example.com/model.bin";
const SIZE: usize = 100_000;

fn payload() -> Vec<u8> {
    (0..SIZE).map(|i| (i % 251) as u8).collect()
}

fn fast_catalog() -> SimulatedDownloader {
    SimulatedDownloader::new()
        .tick(Duration::from_millis(1))
        .chunk_bytes(10_000)
        .with_asset(URL, payload())
}

fn slow_catalog() -> SimulatedDownloader {
    SimulatedDownloader::new()
        .tick(Duration::from_millis(25))
        .chunk_bytes(1_000)
        .with_asset(URL, payload())
}

fn manager_with(config: ManagerConfig, downloader: SimulatedDownloader) -> AssetManager {
    AssetManager::new(config, Arc::new(downloader)).expect("manager")
}

async fn ready_manager() -> (TempDir, AssetManager) {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), fast_catalog());
    manager.init().await.expect("init");
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    assert_eq!(manager.wait().await.status, AssetStatus::Ready);
    (tmp, manager)
}

fn descriptor(tmp: &TempDir) -> MetadataStore {
    MetadataStore::new(
        haven_assets::AssetStorage::new(tmp.path()),
        DEFAULT_METADATA_FILE,
    )
}

#[tokio::test]
async fn end_to_end_install_reaches_ready() {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), fast_catalog());
    assert_eq!(
        manager.init().await.expect("init").status,
        AssetStatus::NotInstalled
    );

    let mut rx = manager.subscribe();
    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.status == AssetStatus::Downloading {
                seen.push(state.progress);
            } else if state.status != AssetStatus::NotInstalled {
                break;
            }
        }
        seen
    });

    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    let state = manager.wait().await;

    assert_eq!(state.status, AssetStatus::Ready);
    assert_eq!(state.progress, 100.0);
    assert_eq!(state.last_error, None);
    let meta = state.meta.expect("ready carries metadata");
    assert_eq!(meta.filename, "model.bin");
    assert_eq!(meta.version, "1.0");
    assert_eq!(meta.size, Some(SIZE as u64));
    assert!(meta.last_updated.is_some());

    let seen = observer.await.expect("observer");
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");

    assert_eq!(
        std::fs::read(tmp.path().join("model.bin")).unwrap(),
        payload()
    );
    assert_eq!(
        manager.asset_path(),
        Some(tmp.path().join("model.bin"))
    );
    let stored = descriptor(&tmp).load().await.expect("descriptor written");
    assert_eq!(stored.filename, "model.bin");
    assert_eq!(stored.size, Some(SIZE as u64));

    let counters = manager.counters();
    assert_eq!(counters.started, 1);
    assert_eq!(counters.completed, 1);
    assert_eq!(counters.bytes_total, SIZE as u64);
}

#[tokio::test]
async fn corrupted_asset_is_not_ready_after_init() {
    let (tmp, manager) = ready_manager().await;
    std::fs::write(tmp.path().join("model.bin"), vec![0u8; SIZE - 1]).unwrap();

    let state = manager.init().await.expect("init");
    assert_eq!(state.status, AssetStatus::NotInstalled);
    assert_eq!(state.meta, None);
    assert_eq!(manager.asset_path(), None);
    // Retained for diagnostics by default.
    assert!(descriptor(&tmp).load().await.is_some());
}

#[tokio::test]
async fn purge_policy_drops_stale_descriptor() {
    let tmp = tempdir().expect("tempdir");
    let config = ManagerConfig::new(tmp.path()).stale_metadata(StaleMetadata::Purge);
    let manager = manager_with(config, fast_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    assert_eq!(manager.wait().await.status, AssetStatus::Ready);

    std::fs::remove_file(tmp.path().join("model.bin")).unwrap();
    assert_eq!(
        manager.init().await.expect("init").status,
        AssetStatus::NotInstalled
    );
    assert!(descriptor(&tmp).load().await.is_none());
}

#[tokio::test]
async fn cancel_removes_partial_and_resets_state() {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), slow_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(manager.state().status, AssetStatus::Downloading);

    assert!(manager.cancel().await);
    let state = manager.state();
    assert_eq!(state.status, AssetStatus::NotInstalled);
    assert_eq!(state.progress, 0.0);
    assert!(!tmp.path().join("model.bin").exists());
    assert!(!tmp.path().join("model.bin.part").exists());
    assert!(!tmp.path().join("model.bin.part.meta").exists());
    assert!(descriptor(&tmp).load().await.is_none());
    assert_eq!(manager.counters().canceled, 1);

    assert!(!manager.cancel().await, "second cancel is a no-op");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (tmp, manager) = ready_manager().await;

    manager.delete().await.expect("first delete");
    let state = manager.state();
    assert_eq!(state.status, AssetStatus::NotInstalled);
    assert_eq!(state.meta, None);
    assert_eq!(state.progress, 0.0);
    assert!(!tmp.path().join("model.bin").exists());
    assert!(descriptor(&tmp).load().await.is_none());

    manager.delete().await.expect("second delete");
    assert_eq!(manager.state().status, AssetStatus::NotInstalled);
}

#[tokio::test]
async fn delete_stops_a_running_download() {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), slow_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0"))
        .await
        .expect("start download");
    tokio::time::sleep(Duration::from_millis(60)).await;

    manager.delete().await.expect("delete");
    assert_eq!(manager.state().status, AssetStatus::NotInstalled);
    assert!(!tmp.path().join("model.bin").exists());
    assert!(!tmp.path().join("model.bin.part").exists());
}

#[tokio::test]
async fn second_download_is_rejected_while_running() {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), slow_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    tokio::time::sleep(Duration::from_millis(120)).await;
    let before = manager.state();
    assert_eq!(before.status, AssetStatus::Downloading);

    let err = manager
        .download(URL, "model.bin", AssetSpec::new("2.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::AlreadyInProgress(_)));

    let after = manager.state();
    assert_eq!(after.status, AssetStatus::Downloading);
    assert!(after.progress >= before.progress);
    assert_eq!(manager.counters().started, 1);

    assert!(manager.cancel().await);
}

#[tokio::test]
async fn size_mismatch_ends_in_error() {
    let tmp = tempdir().expect("tempdir");
    let catalog = SimulatedDownloader::new()
        .tick(Duration::from_millis(1))
        .with_asset(URL, vec![1u8; 999]);
    let manager = manager_with(ManagerConfig::new(tmp.path()), catalog);
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(1000))
        .await
        .expect("start download");

    let state = manager.wait().await;
    assert_eq!(state.status, AssetStatus::Error);
    assert_eq!(state.last_error.as_deref(), Some("verification failed"));
    assert_eq!(state.meta, None);
    assert_eq!(manager.counters().errors, 1);
    assert!(descriptor(&tmp).load().await.is_some());
}

#[tokio::test]
async fn strict_mode_requires_a_checksum() {
    let tmp = tempdir().expect("tempdir");
    let config = ManagerConfig::new(tmp.path()).require_checksum(true);
    let manager = manager_with(config, fast_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0").with_size(SIZE as u64))
        .await
        .expect("start download");
    assert_eq!(manager.wait().await.status, AssetStatus::Error);

    let digest = haven_assets::sha256_file(&tmp.path().join("model.bin"))
        .await
        .expect("hash");
    manager
        .download(
            URL,
            "model.bin",
            AssetSpec::new("1.0").with_checksum(digest.to_uppercase()),
        )
        .await
        .expect("restart download");
    assert_eq!(manager.wait().await.status, AssetStatus::Ready);
}

#[tokio::test]
async fn transfer_failure_is_reported_and_recoverable() {
    let tmp = tempdir().expect("tempdir");
    let manager = manager_with(ManagerConfig::new(tmp.path()), fast_catalog());
    manager
        .download(
            "https://example.com/missing.bin",
            "model.bin",
            AssetSpec::new("1.0"),
        )
        .await
        .expect("start download");

    let state = manager.wait().await;
    assert_eq!(state.status, AssetStatus::Error);
    let reason = state.last_error.expect("last error recorded");
    assert!(reason.contains("404 Not Found"), "{reason}");
    assert!(!tmp.path().join("model.bin").exists());

    manager
        .download(URL, "model.bin", AssetSpec::new("1.0"))
        .await
        .expect("retry download");
    let state = manager.wait().await;
    assert_eq!(state.status, AssetStatus::Ready);
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn second_manager_for_same_directory_is_refused() {
    let tmp = tempdir().expect("tempdir");
    let _first = manager_with(ManagerConfig::new(tmp.path()), fast_catalog());
    let second = AssetManager::new(ManagerConfig::new(tmp.path()), Arc::new(fast_catalog()));
    assert!(matches!(second, Err(AssetError::TargetClaimed(_))));
}

#[tokio::test]
async fn descriptor_file_name_is_configurable() {
    let tmp = tempdir().expect("tempdir");
    let config = ManagerConfig::new(tmp.path()).metadata_file("asset.json");
    let manager = manager_with(config, fast_catalog());
    manager
        .download(URL, "model.bin", AssetSpec::new("1.0"))
        .await
        .expect("start download");
    assert_eq!(manager.wait().await.status, AssetStatus::Ready);
    assert!(tmp.path().join("asset.json").exists());
    assert!(!tmp.path().join(DEFAULT_METADATA_FILE).exists());
}

#[tokio::test]
async fn names_the_manager_writes_itself_are_refused() {
    let tmp = tempdir().expect("tempdir");
    let config = ManagerConfig::new(tmp.path()).metadata_file("asset.json");
    let manager = manager_with(config, fast_catalog());
    manager.init().await.expect("init");

    for name in ["asset.json", "model.bin.part", "model.bin.part.meta", "asset.json.tmp"] {
        let err = manager
            .download(URL, name, AssetSpec::new("1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::InvalidFilename(_)), "{name}: {err}");
        assert_eq!(manager.state().status, AssetStatus::NotInstalled);
        assert!(!tmp.path().join(name).exists(), "{name} written");
    }
    assert_eq!(manager.counters().started, 0);

    // The default descriptor name is free once another one is configured.
    manager
        .download(URL, DEFAULT_METADATA_FILE, AssetSpec::new("1.0"))
        .await
        .expect("start download");
    let state = manager.wait().await;
    assert_eq!(state.status, AssetStatus::Ready);
    assert_eq!(
        std::fs::read(tmp.path().join(DEFAULT_METADATA_FILE)).expect("asset"),
        payload()
    );
}

#[tokio::test]
async fn default_descriptor_name_cannot_be_downloaded_over() {
    let (tmp, manager) = ready_manager().await;
    let err = manager
        .download(URL, DEFAULT_METADATA_FILE, AssetSpec::new("2.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::InvalidFilename(_)));
    let state = manager.state();
    assert_eq!(state.status, AssetStatus::Ready);
    assert_eq!(state.meta.expect("meta").filename, "model.bin");
    assert_eq!(
        descriptor(&tmp).load().await.expect("descriptor").version,
        "1.0"
    );
}
