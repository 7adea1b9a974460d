//! Lifecycle orchestrator: the single owner of one managed asset directory.
//!
//! State lives in a `watch` channel so callers can poll a snapshot or follow
//! transitions. Mutating operations are serialized; the in-flight transfer is
//! tracked in a slot keyed by generation so a superseded transfer can never
//! overwrite newer state.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::counters::DownloadCounters;
use crate::download::{
    redact_url, sibling_with_suffix, CompletedTransfer, DownloadHandle, Downloader, ProgressFn,
    TransferRequest, PART_META_SUFFIX, PART_SUFFIX,
};
use crate::error::AssetError;
use crate::metadata::{AssetMetadata, AssetSpec, MetadataStore, DEFAULT_METADATA_FILE};
use crate::storage::AssetStorage;
use crate::verify::IntegrityVerifier;

const VERIFICATION_FAILED: &str = "verification failed";

static CLAIMED_DIRS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    #[default]
    NotInstalled,
    Downloading,
    Ready,
    Error,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::NotInstalled => "not_installed",
            AssetStatus::Downloading => "downloading",
            AssetStatus::Ready => "ready",
            AssetStatus::Error => "error",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the descriptor when the asset it names fails verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleMetadata {
    /// Keep it on disk for diagnostics.
    #[default]
    Retain,
    Purge,
}

/// Observable lifecycle snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleState {
    pub status: AssetStatus,
    pub meta: Option<AssetMetadata>,
    /// Percentage in `[0, 100]`; meaningful while downloading.
    pub progress: f64,
    pub last_error: Option<String>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            status: AssetStatus::NotInstalled,
            meta: None,
            progress: 0.0,
            last_error: None,
        }
    }
}

impl LifecycleState {
    fn ready(meta: AssetMetadata) -> Self {
        Self {
            status: AssetStatus::Ready,
            meta: Some(meta),
            progress: 100.0,
            last_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == AssetStatus::Ready
    }
}

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub asset_dir: PathBuf,
    pub metadata_file: String,
    pub require_checksum: bool,
    pub stale_metadata: StaleMetadata,
}

impl ManagerConfig {
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
            require_checksum: false,
            stale_metadata: StaleMetadata::default(),
        }
    }

    pub fn metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_file = name.into();
        self
    }

    pub fn require_checksum(mut self, strict: bool) -> Self {
        self.require_checksum = strict;
        self
    }

    pub fn stale_metadata(mut self, policy: StaleMetadata) -> Self {
        self.stale_metadata = policy;
        self
    }
}

/// Process-wide ownership of a managed directory, released on drop.
struct DirClaim {
    key: PathBuf,
}

impl DirClaim {
    fn acquire(dir: &Path) -> Result<Self, AssetError> {
        let key = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut claimed = lock(&CLAIMED_DIRS);
        if !claimed.insert(key.clone()) {
            return Err(AssetError::TargetClaimed(key));
        }
        Ok(Self { key })
    }
}

impl Drop for DirClaim {
    fn drop(&mut self) {
        lock(&CLAIMED_DIRS).remove(&self.key);
    }
}

struct ActiveDownload {
    generation: u64,
    filename: String,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

enum Settled {
    Ready { meta: AssetMetadata, bytes: u64 },
    Rejected(AssetError),
    Failed(String),
    Canceled,
}

struct Inner {
    storage: AssetStorage,
    metadata: MetadataStore,
    verifier: IntegrityVerifier,
    downloader: Arc<dyn Downloader>,
    stale_metadata: StaleMetadata,
    state: watch::Sender<LifecycleState>,
    active: Mutex<Option<ActiveDownload>>,
    /// Serializes init/download/cancel/delete.
    ops: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    /// Generation allowed to publish progress; 0 when idle.
    live_generation: AtomicU64,
    counters: Mutex<DownloadCounters>,
    _claim: DirClaim,
}

/// Cloneable handle to the orchestrator of one managed directory.
#[derive(Clone)]
pub struct AssetManager {
    inner: Arc<Inner>,
}

impl AssetManager {
    /// Fails with [`AssetError::TargetClaimed`] while another manager owns the
    /// same directory in this process.
    pub fn new(config: ManagerConfig, downloader: Arc<dyn Downloader>) -> Result<Self, AssetError> {
        let storage = AssetStorage::new(config.asset_dir.clone());
        storage.path_for(&config.metadata_file)?;
        let claim = DirClaim::acquire(&config.asset_dir)?;
        let metadata = MetadataStore::new(storage.clone(), config.metadata_file);
        let verifier =
            IntegrityVerifier::new(storage.clone()).require_checksum(config.require_checksum);
        let (state, _) = watch::channel(LifecycleState::default());
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                metadata,
                verifier,
                downloader,
                stale_metadata: config.stale_metadata,
                state,
                active: Mutex::new(None),
                ops: tokio::sync::Mutex::new(()),
                next_generation: AtomicU64::new(0),
                live_generation: AtomicU64::new(0),
                counters: Mutex::new(DownloadCounters::default()),
                _claim: claim,
            }),
        })
    }

    pub fn storage(&self) -> &AssetStorage {
        &self.inner.storage
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.inner.verifier
    }

    pub fn downloader_kind(&self) -> &'static str {
        self.inner.downloader.kind()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    pub fn counters(&self) -> DownloadCounters {
        *lock(&self.inner.counters)
    }

    /// Location of the installed asset while ready.
    pub fn asset_path(&self) -> Option<PathBuf> {
        let state = self.inner.state.borrow();
        match (&state.status, &state.meta) {
            (AssetStatus::Ready, Some(meta)) => self.inner.storage.path_for(&meta.filename).ok(),
            _ => None,
        }
    }

    /// Reconcile state with what is on disk. Ignored while downloading.
    pub async fn init(&self) -> Result<LifecycleState, AssetError> {
        let inner = &self.inner;
        let _ops = inner.ops.lock().await;
        let downloading = inner.state.borrow().status == AssetStatus::Downloading;
        if downloading {
            debug!("init ignored while a download is running");
            return Ok(self.state());
        }
        inner.storage.ensure_directory().await?;

        let next = match inner.metadata.load().await {
            None => LifecycleState::default(),
            Some(meta) => {
                let outcome = inner.verifier.check(&meta).await;
                if outcome.passed() {
                    info!(file = %meta.filename, version = %meta.version, "installed asset verified");
                    LifecycleState::ready(meta)
                } else {
                    warn!(
                        file = %meta.filename,
                        reason = %outcome.describe(),
                        "installed asset failed verification"
                    );
                    inner.discard_stale().await;
                    LifecycleState::default()
                }
            }
        };
        inner.state.send_replace(next.clone());
        Ok(next)
    }

    /// Start fetching `url` into `filename`. Returns once the transfer runs;
    /// follow completion through [`wait`](Self::wait) or [`subscribe`](Self::subscribe).
    pub async fn download(
        &self,
        url: &str,
        filename: &str,
        spec: AssetSpec,
    ) -> Result<(), AssetError> {
        let inner = &self.inner;
        let _ops = inner.ops.lock().await;
        let destination = inner.storage.path_for(filename)?;
        if inner.owns_name(filename) {
            return Err(AssetError::InvalidFilename(filename.to_string()));
        }

        let mut active = lock(&inner.active);
        if active.is_some() {
            return Err(AssetError::AlreadyInProgress(
                destination.display().to_string(),
            ));
        }

        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let request = TransferRequest::new(url, destination)
            .on_progress(progress_sink(Arc::downgrade(&self.inner), generation));
        let handle = match inner.downloader.start(request) {
            Ok(handle) => handle,
            Err(err @ AssetError::AlreadyInProgress(_)) => return Err(err),
            Err(err) => {
                warn!(url = %redact_url(url), %err, "asset download could not start");
                lock(&inner.counters).record_error();
                inner.state.send_modify(|s| {
                    s.status = AssetStatus::Error;
                    s.last_error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        inner.live_generation.store(generation, Ordering::Release);
        inner.state.send_modify(|s| {
            s.status = AssetStatus::Downloading;
            s.progress = 0.0;
            s.last_error = None;
        });
        lock(&inner.counters).record_started();
        info!(
            url = %redact_url(url),
            file = filename,
            via = inner.downloader.kind(),
            "asset download started"
        );

        let cancel = handle.cancel_token();
        let supervisor = tokio::spawn(Inner::supervise(
            self.inner.clone(),
            generation,
            filename.to_string(),
            spec,
            handle,
        ));
        *active = Some(ActiveDownload {
            generation,
            filename: filename.to_string(),
            cancel,
            supervisor,
        });
        Ok(())
    }

    /// Resolve with the state once no download is running.
    pub async fn wait(&self) -> LifecycleState {
        let mut rx = self.inner.state.subscribe();
        let settled = rx
            .wait_for(|s| s.status != AssetStatus::Downloading)
            .await
            .map(|s| (*s).clone());
        settled.unwrap_or_else(|_| self.state())
    }

    /// Stop the running download and remove what it wrote. Returns `false`
    /// when nothing was running.
    pub async fn cancel(&self) -> bool {
        let _ops = self.inner.ops.lock().await;
        self.inner.cancel_active().await
    }

    /// Remove the asset, its partials and the descriptor whatever the current
    /// status. Idempotent.
    pub async fn delete(&self) -> Result<(), AssetError> {
        let inner = &self.inner;
        let _ops = inner.ops.lock().await;
        inner.cancel_active().await;

        let recorded = {
            let state = inner.state.borrow();
            state.meta.as_ref().map(|m| m.filename.clone())
        };
        let stored = inner.metadata.load().await.map(|m| m.filename);
        let mut names: Vec<String> = recorded.into_iter().chain(stored).collect();
        names.dedup();

        for name in names {
            let Ok(path) = inner.storage.path_for(&name) else {
                continue;
            };
            inner.storage.delete(&path).await?;
            inner
                .storage
                .delete(&sibling_with_suffix(&path, PART_SUFFIX))
                .await?;
            inner
                .storage
                .delete(&sibling_with_suffix(&path, PART_META_SUFFIX))
                .await?;
        }
        inner.metadata.clear().await?;
        inner.state.send_replace(LifecycleState::default());
        info!(dir = %inner.storage.root().display(), "asset deleted");
        Ok(())
    }
}

impl Inner {
    /// Names the manager writes itself: the descriptor and transfer scratch files.
    fn owns_name(&self, filename: &str) -> bool {
        filename == self.metadata.file_name()
            || [PART_SUFFIX, PART_META_SUFFIX, "tmp"]
                .iter()
                .any(|suffix| filename.ends_with(&format!(".{suffix}")))
    }

    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        filename: String,
        spec: AssetSpec,
        handle: DownloadHandle,
    ) {
        let settled = match handle.finish().await {
            Ok(done) => self.install(&filename, spec, done).await,
            Err(AssetError::Canceled) => Settled::Canceled,
            Err(err) => Settled::Failed(err.to_string()),
        };
        self.settle(generation, settled);
    }

    async fn install(&self, filename: &str, spec: AssetSpec, done: CompletedTransfer) -> Settled {
        if done.resumed_from > 0 {
            lock(&self.counters).record_resumed();
        }
        let meta = spec.into_metadata(filename);
        if let Err(err) = self.metadata.save(&meta).await {
            return Settled::Failed(err.to_string());
        }
        let outcome = self.verifier.check(&meta).await;
        if outcome.passed() {
            return Settled::Ready {
                meta,
                bytes: done.bytes,
            };
        }
        debug!(file = %filename, sha256 = %done.sha256, "downloaded asset rejected");
        self.discard_stale().await;
        Settled::Rejected(AssetError::VerificationFailed(outcome.describe()))
    }

    /// Publish the outcome of `generation` unless a cancel already took over.
    fn settle(&self, generation: u64, settled: Settled) {
        let mut active = lock(&self.active);
        if active.as_ref().map(|a| a.generation) != Some(generation) {
            debug!(generation, "download outcome superseded");
            return;
        }
        *active = None;
        self.live_generation.store(0, Ordering::Release);

        let mut counters = lock(&self.counters);
        match settled {
            Settled::Ready { meta, bytes } => {
                counters.record_completed(bytes);
                info!(file = %meta.filename, bytes, "asset ready");
                self.state.send_replace(LifecycleState::ready(meta));
            }
            Settled::Rejected(err) => {
                counters.record_error();
                warn!(%err, "downloaded asset failed verification");
                self.state.send_modify(|s| {
                    s.status = AssetStatus::Error;
                    s.meta = None;
                    s.last_error = Some(VERIFICATION_FAILED.to_string());
                });
            }
            Settled::Failed(reason) => {
                counters.record_error();
                warn!(%reason, "asset download failed");
                self.state.send_modify(|s| {
                    s.status = AssetStatus::Error;
                    s.last_error = Some(reason);
                });
            }
            Settled::Canceled => {
                counters.record_canceled();
                self.state.send_replace(LifecycleState::default());
            }
        }
    }

    fn record_progress(&self, generation: u64, pct: f64) {
        if self.live_generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.state.send_if_modified(|s| {
            if s.status == AssetStatus::Downloading && pct > s.progress {
                s.progress = pct.min(100.0);
                true
            } else {
                false
            }
        });
    }

    async fn cancel_active(&self) -> bool {
        let taken = lock(&self.active).take();
        let Some(active) = taken else {
            return false;
        };
        self.live_generation.store(0, Ordering::Release);
        info!(file = %active.filename, "canceling asset download");

        active.cancel.cancel();
        if let Err(err) = active.supervisor.await {
            warn!(%err, "download supervisor ended abnormally");
        }

        match self.storage.path_for(&active.filename) {
            Ok(path) => {
                if let Err(err) = self.storage.delete(&path).await {
                    warn!(%err, "failed to remove canceled asset");
                }
            }
            Err(err) => warn!(%err, "canceled download named an invalid file"),
        }
        let names_target = self
            .metadata
            .load()
            .await
            .is_some_and(|m| m.filename == active.filename);
        if names_target {
            if let Err(err) = self.metadata.clear().await {
                warn!(%err, "failed to clear descriptor of canceled asset");
            }
        }

        lock(&self.counters).record_canceled();
        self.state.send_replace(LifecycleState::default());
        true
    }

    async fn discard_stale(&self) {
        if self.stale_metadata != StaleMetadata::Purge {
            return;
        }
        match self.metadata.clear().await {
            Ok(()) => debug!("stale asset descriptor purged"),
            Err(err) => warn!(%err, "failed to purge stale asset descriptor"),
        }
    }
}

fn progress_sink(inner: Weak<Inner>, generation: u64) -> ProgressFn {
    Arc::new(move |pct| {
        if let Some(inner) = inner.upgrade() {
            inner.record_progress(generation, pct);
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
