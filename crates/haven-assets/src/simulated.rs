//! Offline transport serving bytes from an in-memory catalog.
//!
//! Used for demos and tests: each tick writes one chunk through the same
//! partial-file path the HTTP transport uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::download::{
    parse_source_url, redact_url, ActiveTransfers, CompletedTransfer, DownloadHandle, Downloader,
    ProgressReporter, TransferPaths, TransferRequest,
};
use crate::error::AssetError;

const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;
const DEFAULT_TICK: Duration = Duration::from_millis(5);

#[derive(Clone)]
pub struct SimulatedDownloader {
    catalog: HashMap<String, Arc<Vec<u8>>>,
    chunk_bytes: usize,
    tick: Duration,
    announce_total: bool,
    active: ActiveTransfers,
}

impl Default for SimulatedDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDownloader {
    pub fn new() -> Self {
        Self {
            catalog: HashMap::new(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            tick: DEFAULT_TICK,
            announce_total: true,
            active: ActiveTransfers::default(),
        }
    }

    /// Serve `bytes` for `url`.
    pub fn with_asset(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.catalog.insert(url.into(), Arc::new(bytes.into()));
        self
    }

    pub fn chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes.max(1);
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Behave like a server that sends no length: no percentages are reported.
    pub fn without_total(mut self) -> Self {
        self.announce_total = false;
        self
    }
}

impl Downloader for SimulatedDownloader {
    fn kind(&self) -> &'static str {
        "simulated"
    }

    fn start(&self, request: TransferRequest) -> Result<DownloadHandle, AssetError> {
        parse_source_url(&request.url)?;
        let guard = self.active.claim(&request.destination)?;
        let cancel = CancellationToken::new();
        let job = SimulatedJob {
            body: self.catalog.get(request.url.trim()).cloned(),
            redacted: redact_url(&request.url),
            chunk_bytes: self.chunk_bytes,
            tick: self.tick,
            announce_total: self.announce_total,
            paths: TransferPaths::for_destination(&request.destination),
            progress: ProgressReporter::new(request.on_progress),
            cancel: cancel.clone(),
        };
        Ok(DownloadHandle::spawn(request.destination, cancel, async move {
            let _guard = guard;
            job.run().await
        }))
    }
}

struct SimulatedJob {
    body: Option<Arc<Vec<u8>>>,
    redacted: String,
    chunk_bytes: usize,
    tick: Duration,
    announce_total: bool,
    paths: TransferPaths,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl SimulatedJob {
    async fn run(mut self) -> Result<CompletedTransfer, AssetError> {
        let result = self.transfer().await;
        match &result {
            Ok(done) => info!(url = %self.redacted, bytes = done.bytes, "simulated download complete"),
            Err(err) => {
                debug!(url = %self.redacted, %err, "simulated download ended");
                self.paths.discard().await;
            }
        }
        result
    }

    async fn transfer(&mut self) -> Result<CompletedTransfer, AssetError> {
        let Some(body) = self.body.clone() else {
            return Err(AssetError::download("http", "404 Not Found"));
        };
        self.paths.ensure_parent().await?;

        let file = tokio::fs::File::create(&self.paths.part)
            .await
            .map_err(|e| AssetError::download("io", e.to_string()))?;
        let mut file = BufWriter::new(file);
        let mut hasher = Sha256::new();
        let total = self.announce_total.then_some(body.len() as u64);
        let mut written = 0u64;

        for chunk in body.chunks(self.chunk_bytes) {
            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.cancel.cancelled() => return Err(AssetError::Canceled),
            }
            file.write_all(chunk)
                .await
                .map_err(|e| AssetError::download("io", e.to_string()))?;
            hasher.update(chunk);
            written += chunk.len() as u64;
            self.progress.report(written, total);
        }

        file.flush()
            .await
            .map_err(|e| AssetError::download("io", e.to_string()))?;
        file.get_mut()
            .sync_all()
            .await
            .map_err(|e| AssetError::download("io", e.to_string()))?;
        drop(file);

        if self.cancel.is_cancelled() {
            return Err(AssetError::Canceled);
        }
        self.paths.commit().await?;
        Ok(CompletedTransfer {
            path: self.paths.target.clone(),
            bytes: written,
            sha256: hex::encode(hasher.finalize()),
            resumed_from: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::ProgressFn;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const URL: &str = "https://example.com/model.bin";

    fn fast() -> SimulatedDownloader {
        SimulatedDownloader::new().tick(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn serves_catalog_bytes_and_reports_progress() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("model.bin");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |pct| sink.lock().unwrap().push(pct));

        let downloader = fast().chunk_bytes(250).with_asset(URL, vec![9u8; 1000]);
        let done = downloader
            .start(TransferRequest::new(URL, &target).on_progress(progress))
            .expect("start")
            .finish()
            .await
            .expect("finish");

        assert_eq!(done.bytes, 1000);
        assert_eq!(done.path, target);
        assert_eq!(std::fs::read(&target).unwrap(), vec![9u8; 1000]);
        assert!(!tmp.path().join("model.bin.part").exists());
        assert_eq!(*seen.lock().unwrap(), vec![25.0, 50.0, 75.0, 100.0]);
    }

    #[tokio::test]
    async fn unknown_url_is_not_found() {
        let tmp = tempdir().expect("tempdir");
        let err = fast()
            .start(TransferRequest::new(URL, tmp.path().join("model.bin")))
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
        assert!(!tmp.path().join("model.bin").exists());
    }

    #[tokio::test]
    async fn unknown_total_reports_nothing() {
        let tmp = tempdir().expect("tempdir");
        let calls = Arc::new(Mutex::new(0usize));
        let sink = calls.clone();
        let progress: ProgressFn = Arc::new(move |_| *sink.lock().unwrap() += 1);
        fast()
            .without_total()
            .with_asset(URL, vec![1u8; 64])
            .start(TransferRequest::new(URL, tmp.path().join("model.bin")).on_progress(progress))
            .expect("start")
            .finish()
            .await
            .expect("finish");
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn second_start_for_same_target_is_rejected() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("model.bin");
        let downloader = SimulatedDownloader::new()
            .tick(Duration::from_millis(20))
            .chunk_bytes(10)
            .with_asset(URL, vec![0u8; 100]);
        let first = downloader
            .start(TransferRequest::new(URL, &target))
            .expect("first");
        assert!(matches!(
            downloader.start(TransferRequest::new(URL, &target)),
            Err(AssetError::AlreadyInProgress(_))
        ));
        first.cancel().await.expect("cancel");
        downloader
            .start(TransferRequest::new(URL, &target))
            .expect("restart after cancel")
            .cancel()
            .await
            .expect("cancel restart");
    }

    #[tokio::test]
    async fn cancel_leaves_no_files() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("model.bin");
        let handle = SimulatedDownloader::new()
            .tick(Duration::from_millis(20))
            .chunk_bytes(10)
            .with_asset(URL, vec![0u8; 1000])
            .start(TransferRequest::new(URL, &target))
            .expect("start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await.expect("cancel");
        assert!(!target.exists());
        assert!(!tmp.path().join("model.bin.part").exists());
        assert!(!tmp.path().join("model.bin.part.meta").exists());
    }
}
