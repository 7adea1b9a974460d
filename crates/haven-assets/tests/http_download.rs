use std::sync::{Arc, Mutex};
use std::time::Duration;

use haven_assets::{
    sha256_file, AssetError, AssetManager, AssetSpec, AssetStatus, DownloadTuning, Downloader,
    HttpDownloader, ManagerConfig, ProgressFn, TransferRequest,
};
use httpmock::prelude::*;
use tempfile::tempdir;

const BODY: &[u8] = b"hello world";
const BODY_SHA: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

fn downloader() -> HttpDownloader {
    let tuning = DownloadTuning {
        retry_backoff_ms: 10,
        ..Default::default()
    };
    HttpDownloader::new(tuning).expect("http client")
}

#[tokio::test]
async fn full_download_commits_and_hashes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(200).header("etag", "\"v1\"").body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let target = tmp.path().join("model.bin");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: ProgressFn = Arc::new(move |pct| sink.lock().unwrap().push(pct));

    let done = downloader()
        .start(TransferRequest::new(server.url("/model.bin"), &target).on_progress(progress))
        .expect("start")
        .finish()
        .await
        .expect("finish");

    mock.assert_async().await;
    assert_eq!(done.bytes, BODY.len() as u64);
    assert_eq!(done.sha256, BODY_SHA);
    assert_eq!(done.resumed_from, 0);
    assert_eq!(std::fs::read(&target).unwrap(), BODY);
    assert!(!tmp.path().join("model.bin.part").exists());
    assert!(!tmp.path().join("model.bin.part.meta").exists());
    assert_eq!(seen.lock().unwrap().last().copied(), Some(100.0));
}

#[tokio::test]
async fn not_found_fails_without_leaving_files() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(404);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let err = downloader()
        .start(TransferRequest::new(
            server.url("/model.bin"),
            tmp.path().join("model.bin"),
        ))
        .expect("start")
        .finish()
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AssetError::DownloadFailed {
            code: "http",
            message: "404 Not Found".into()
        }
    );
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn leftover_partial_resumes_with_range() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/model.bin")
                .header("range", "bytes=5-")
                .header("if-range", "\"v1\"");
            then.status(206)
                .header("content-range", "bytes 5-10/11")
                .header("etag", "\"v1\"")
                .body(&BODY[5..]);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let target = tmp.path().join("model.bin");
    std::fs::write(tmp.path().join("model.bin.part"), &BODY[..5]).unwrap();
    std::fs::write(
        tmp.path().join("model.bin.part.meta"),
        br#"{"etag":"\"v1\""}"#,
    )
    .unwrap();

    let done = downloader()
        .start(TransferRequest::new(server.url("/model.bin"), &target))
        .expect("start")
        .finish()
        .await
        .expect("finish");

    mock.assert_async().await;
    assert_eq!(done.resumed_from, 5);
    assert_eq!(done.bytes, BODY.len() as u64);
    assert_eq!(done.sha256, BODY_SHA);
    assert_eq!(std::fs::read(&target).unwrap(), BODY);
}

#[tokio::test]
async fn mismatched_content_range_discards_partial() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(206)
                .header("content-range", "bytes 0-10/11")
                .body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    std::fs::write(tmp.path().join("model.bin.part"), &BODY[..5]).unwrap();

    let err = downloader()
        .start(TransferRequest::new(
            server.url("/model.bin"),
            tmp.path().join("model.bin"),
        ))
        .expect("start")
        .finish()
        .await
        .unwrap_err();

    assert_eq!(err.code(), "resume-content-range");
    assert!(!tmp.path().join("model.bin.part").exists());
    assert!(!tmp.path().join("model.bin").exists());
}

#[tokio::test]
async fn full_response_to_range_restarts_from_zero() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(200).body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let target = tmp.path().join("model.bin");
    std::fs::write(tmp.path().join("model.bin.part"), b"stale bytes from elsewhere").unwrap();

    let done = downloader()
        .start(TransferRequest::new(server.url("/model.bin"), &target))
        .expect("start")
        .finish()
        .await
        .expect("finish");

    assert_eq!(done.resumed_from, 0);
    assert_eq!(done.sha256, BODY_SHA);
    assert_eq!(std::fs::read(&target).unwrap(), BODY);
}

#[tokio::test]
async fn declared_size_above_limit_is_refused() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(200).body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let tuning = DownloadTuning {
        max_bytes: Some(4),
        ..Default::default()
    };
    let err = HttpDownloader::new(tuning)
        .expect("http client")
        .start(TransferRequest::new(
            server.url("/model.bin"),
            tmp.path().join("model.bin"),
        ))
        .expect("start")
        .finish()
        .await
        .unwrap_err();

    assert_eq!(err.code(), "size-limit");
    assert!(!tmp.path().join("model.bin").exists());
    assert!(!tmp.path().join("model.bin.part").exists());
}

#[tokio::test]
async fn silent_server_hits_the_idle_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(200).delay(Duration::from_secs(3)).body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let tuning = DownloadTuning {
        idle_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let err = HttpDownloader::new(tuning)
        .expect("http client")
        .start(TransferRequest::new(
            server.url("/model.bin"),
            tmp.path().join("model.bin"),
        ))
        .expect("start")
        .finish()
        .await
        .unwrap_err();

    assert_eq!(err.code(), "request-timeout");
}

#[tokio::test]
async fn manager_installs_over_http_with_checksum() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/model.bin");
            then.status(200).body(BODY);
        })
        .await;

    let tmp = tempdir().expect("tempdir");
    let manager = AssetManager::new(
        ManagerConfig::new(tmp.path()).require_checksum(true),
        Arc::new(downloader()),
    )
    .expect("manager");
    manager.init().await.expect("init");
    manager
        .download(
            &server.url("/model.bin"),
            "model.bin",
            AssetSpec::new("1.0")
                .with_size(BODY.len() as u64)
                .with_checksum(BODY_SHA),
        )
        .await
        .expect("start download");

    let state = manager.wait().await;
    assert_eq!(state.status, AssetStatus::Ready);
    assert_eq!(state.progress, 100.0);
    let installed = manager.asset_path().expect("asset path");
    assert_eq!(sha256_file(&installed).await.unwrap(), BODY_SHA);
    assert_eq!(manager.downloader_kind(), "http");
}
