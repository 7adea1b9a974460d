//! Download controller contract shared by the HTTP and simulated transports.
//!
//! A transfer writes into `<target>.part` next to the destination and renames
//! it onto the destination only once every byte is flushed, so the destination
//! path never holds a partial file. Resume validators live in
//! `<target>.part.meta`.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AssetError;

/// Progress callback, invoked with a percentage in `[0, 100]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

pub(crate) const PART_SUFFIX: &str = "part";
pub(crate) const PART_META_SUFFIX: &str = "part.meta";

/// Transport knobs for a download controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DownloadTuning {
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub send_retries: u32,
    pub stream_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_bytes: Option<u64>,
    pub disk_reserve_bytes: u64,
}

impl Default for DownloadTuning {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            connect_timeout: Duration::from_secs(20),
            send_retries: 2,
            stream_retries: 2,
            retry_backoff_ms: 500,
            max_bytes: None,
            disk_reserve_bytes: 0,
        }
    }
}

impl DownloadTuning {
    pub fn idle_timeout_secs(&self) -> Option<u64> {
        self.idle_timeout.map(|d| d.as_secs())
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let step = attempt.max(1);
        let base = Duration::from_millis(self.retry_backoff_ms);
        base.checked_mul(step).unwrap_or(base)
    }
}

/// One transfer to start.
pub struct TransferRequest {
    pub url: String,
    /// Final location, already resolved under the managed directory.
    pub destination: PathBuf,
    pub on_progress: Option<ProgressFn>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            on_progress: None,
        }
    }

    pub fn on_progress(mut self, callback: ProgressFn) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// What a successful transfer produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub path: PathBuf,
    pub bytes: u64,
    /// SHA-256 of the committed bytes, computed while streaming.
    pub sha256: String,
    /// Offset a leftover partial was resumed from; 0 for a fresh transfer.
    pub resumed_from: u64,
}

/// Capability interface for moving a remote asset into local storage.
pub trait Downloader: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Begin a transfer. Fails with [`AssetError::AlreadyInProgress`] when a
    /// transfer to the same destination is still running.
    fn start(&self, request: TransferRequest) -> Result<DownloadHandle, AssetError>;
}

/// Live transfer. Dropping it detaches the transfer; use [`cancel`](Self::cancel)
/// to stop it.
pub struct DownloadHandle {
    destination: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<Result<CompletedTransfer, AssetError>>,
}

impl DownloadHandle {
    pub(crate) fn spawn<F>(destination: PathBuf, cancel: CancellationToken, job: F) -> Self
    where
        F: Future<Output = Result<CompletedTransfer, AssetError>> + Send + 'static,
    {
        Self {
            destination,
            cancel,
            task: tokio::spawn(job),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the transfer to end.
    pub async fn finish(self) -> Result<CompletedTransfer, AssetError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(AssetError::download("task", err.to_string())),
        }
    }

    /// Stop the transfer and wait until its partial bytes are gone. A transfer
    /// that committed just before the request is removed as well.
    pub async fn cancel(self) -> Result<(), AssetError> {
        self.cancel.cancel();
        let destination = self.destination.clone();
        match self.finish().await {
            Ok(done) => {
                debug!(path = %done.path.display(), "transfer committed before cancel; removing");
                remove_if_present(&done.path).await
            }
            Err(AssetError::Canceled) => Ok(()),
            Err(err) => {
                debug!(%err, path = %destination.display(), "transfer ended with error while canceling");
                Ok(())
            }
        }
    }
}

/// Destinations with a transfer in flight, one entry per target path.
#[derive(Clone, Default)]
pub(crate) struct ActiveTransfers {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ActiveTransfers {
    pub(crate) fn claim(&self, destination: &Path) -> Result<TransferGuard, AssetError> {
        let mut active = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(destination.to_path_buf()) {
            return Err(AssetError::AlreadyInProgress(
                destination.display().to_string(),
            ));
        }
        Ok(TransferGuard {
            owner: self.inner.clone(),
            destination: destination.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|s| s.len()).unwrap_or_default()
    }
}

pub(crate) struct TransferGuard {
    owner: Arc<Mutex<HashSet<PathBuf>>>,
    destination: PathBuf,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.owner.lock() {
            active.remove(&self.destination);
        }
    }
}

/// Paths involved in one transfer.
#[derive(Clone, Debug)]
pub(crate) struct TransferPaths {
    pub(crate) target: PathBuf,
    pub(crate) part: PathBuf,
    pub(crate) meta: PathBuf,
}

impl TransferPaths {
    pub(crate) fn for_destination(destination: &Path) -> Self {
        Self {
            target: destination.to_path_buf(),
            part: sibling_with_suffix(destination, PART_SUFFIX),
            meta: sibling_with_suffix(destination, PART_META_SUFFIX),
        }
    }

    pub(crate) async fn ensure_parent(&self) -> Result<(), AssetError> {
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AssetError::storage("create asset dir", e))?;
        }
        Ok(())
    }

    /// Drop the partial and its validators.
    pub(crate) async fn discard(&self) {
        if let Err(err) = remove_if_present(&self.part).await {
            warn!(%err, "failed to remove partial download");
        }
        let _ = remove_if_present(&self.meta).await;
    }

    /// Move the finished partial onto the target.
    pub(crate) async fn commit(&self) -> Result<(), AssetError> {
        tokio::fs::rename(&self.part, &self.target)
            .await
            .map_err(|e| AssetError::storage("commit download", e))?;
        let _ = remove_if_present(&self.meta).await;
        Ok(())
    }
}

pub(crate) fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

pub(crate) async fn remove_if_present(path: &Path) -> Result<(), AssetError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AssetError::storage(
            &format!("delete {}", path.display()),
            err,
        )),
    }
}

/// Turns byte counts into percentages: only with a known total, never
/// decreasing.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressFn>,
    last: Option<f64>,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressFn>) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    pub(crate) fn report(&mut self, downloaded: u64, total: Option<u64>) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let pct = ((downloaded as f64) / (total as f64) * 100.0).clamp(0.0, 100.0);
        if self.last.is_some_and(|last| pct <= last) {
            return;
        }
        self.last = Some(pct);
        callback(pct);
    }
}

/// Strip credentials, query and fragment before a URL reaches the logs.
pub fn redact_url(raw: &str) -> String {
    if let Ok(mut url) = url::Url::parse(raw) {
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    } else {
        let no_fragment = raw.split('#').next().unwrap_or(raw);
        no_fragment
            .split('?')
            .next()
            .unwrap_or(no_fragment)
            .to_string()
    }
}

pub(crate) fn parse_source_url(raw: &str) -> Result<url::Url, AssetError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| AssetError::download("invalid-url", format!("{}: {e}", redact_url(raw))))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(AssetError::download(
            "invalid-url",
            format!("unsupported scheme {other:?}"),
        )),
    }
}
