//! Streaming HTTP transport with resume, retries and disk guards.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::{header, Response, StatusCode};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::download::{
    parse_source_url, redact_url, ActiveTransfers, CompletedTransfer, DownloadHandle,
    DownloadTuning, Downloader, ProgressReporter, TransferPaths, TransferRequest,
};
use crate::error::AssetError;
use crate::storage::available_space_near;
use crate::verify::hash_into;

/// Bytes between free-space probes while streaming.
const RESERVE_PROBE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    tuning: DownloadTuning,
    active: ActiveTransfers,
}

impl HttpDownloader {
    pub fn new(tuning: DownloadTuning) -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(tuning.connect_timeout)
            .user_agent(concat!("haven-assets/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AssetError::download("http", format!("http client: {e}")))?;
        Ok(Self::with_client(client, tuning))
    }

    pub fn with_client(client: reqwest::Client, tuning: DownloadTuning) -> Self {
        Self {
            client,
            tuning,
            active: ActiveTransfers::default(),
        }
    }

    pub fn tuning(&self) -> &DownloadTuning {
        &self.tuning
    }
}

impl Downloader for HttpDownloader {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn start(&self, request: TransferRequest) -> Result<DownloadHandle, AssetError> {
        let url = parse_source_url(&request.url)?;
        let guard = self.active.claim(&request.destination)?;
        let cancel = CancellationToken::new();
        let job = HttpJob {
            client: self.client.clone(),
            tuning: self.tuning,
            redacted: redact_url(url.as_str()),
            url,
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

struct HttpJob {
    client: reqwest::Client,
    tuning: DownloadTuning,
    url: url::Url,
    redacted: String,
    paths: TransferPaths,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl HttpJob {
    async fn run(mut self) -> Result<CompletedTransfer, AssetError> {
        let result = self.transfer().await;
        match &result {
            Ok(done) => info!(
                url = %self.redacted,
                bytes = done.bytes,
                resumed_from = done.resumed_from,
                "download complete"
            ),
            Err(AssetError::Canceled) => {
                info!(url = %self.redacted, "download canceled");
                self.paths.discard().await;
            }
            Err(err) => {
                warn!(url = %self.redacted, code = err.code(), %err, "download failed");
                self.paths.discard().await;
            }
        }
        result
    }

    async fn transfer(&mut self) -> Result<CompletedTransfer, AssetError> {
        self.paths.ensure_parent().await?;

        let mut resume_from = fs::metadata(&self.paths.part)
            .await
            .ok()
            .map(|m| m.len())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        if resume_from > 0 {
            if let Err(err) = hash_into(&self.paths.part, &mut hasher).await {
                warn!(%err, "failed to hash existing partial download; restarting");
                self.paths.discard().await;
                resume_from = 0;
                hasher = Sha256::new();
            }
        }
        let if_range = if resume_from > 0 {
            load_resume_if_range(&self.paths.meta).await
        } else {
            None
        };

        let response = self.send(resume_from, if_range.as_deref()).await?;
        save_resume_validators(&self.paths.meta, response.headers()).await;

        let mut total = response.content_length().map(|len| resume_from + len);
        let (file, mut downloaded) = self.open_body(&response, resume_from, &mut hasher).await?;
        if downloaded == 0 {
            total = response.content_length();
        }
        let resumed_from = downloaded;
        if resumed_from > 0 {
            info!(url = %self.redacted, offset = resumed_from, "resuming partial download");
        }
        self.check_declared_size(total)?;

        let mut file = BufWriter::new(file);
        let mut stream = response.bytes_stream().boxed();
        let mut stream_attempt = 0u32;
        let mut last_probe = downloaded;

        loop {
            let next = tokio::select! {
                chunk = stream.next() => chunk,
                _ = self.cancel.cancelled() => return Err(AssetError::Canceled),
                _ = idle(self.tuning.idle_timeout) => {
                    let secs = self.tuning.idle_timeout_secs().unwrap_or_default();
                    warn!(url = %self.redacted, "download idle-timeout after {secs}s");
                    return Err(AssetError::download(
                        "idle-timeout",
                        format!("no data received for {secs} seconds"),
                    ));
                }
            };
            let Some(next) = next else {
                break;
            };
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) if stream_attempt < self.tuning.stream_retries => {
                    stream_attempt += 1;
                    let delay = self.tuning.backoff_delay(stream_attempt);
                    warn!(
                        url = %self.redacted,
                        offset = downloaded,
                        "download stream error (attempt {stream_attempt}): {err}; resuming in {delay:?}"
                    );
                    file.flush().await.map_err(io_failure)?;
                    self.sleep(delay).await?;
                    let validators = load_resume_if_range(&self.paths.meta).await;
                    let response = self.send(downloaded, validators.as_deref()).await?;
                    let (reopened, offset) =
                        self.open_body(&response, downloaded, &mut hasher).await?;
                    if offset == 0 {
                        total = response.content_length();
                        self.check_declared_size(total)?;
                    }
                    downloaded = offset;
                    last_probe = offset;
                    file = BufWriter::new(reopened);
                    stream = response.bytes_stream().boxed();
                    continue;
                }
                Err(err) => {
                    error!(url = %self.redacted, "download chunk error: {err}");
                    return Err(AssetError::download("http", err.to_string()));
                }
            };

            file.write_all(&chunk).await.map_err(io_failure)?;
            hasher.update(&chunk);
            downloaded = downloaded.saturating_add(chunk.len() as u64);

            if let Some(max) = self.tuning.max_bytes {
                if downloaded > max {
                    return Err(AssetError::download(
                        "size-limit",
                        format!("download exceeded max size {max}"),
                    ));
                }
            }
            if self.tuning.disk_reserve_bytes > 0
                && downloaded.saturating_sub(last_probe) >= RESERVE_PROBE_BYTES
            {
                last_probe = downloaded;
                if let Ok(avail) = available_space_near(&self.paths.target) {
                    if avail <= self.tuning.disk_reserve_bytes {
                        return Err(AssetError::download(
                            "disk-insufficient",
                            format!(
                                "download aborted: free space {avail} <= reserve {}",
                                self.tuning.disk_reserve_bytes
                            ),
                        ));
                    }
                }
            }

            self.progress.report(downloaded, total);
        }

        file.flush().await.map_err(io_failure)?;
        file.get_mut().sync_all().await.map_err(io_failure)?;
        drop(file);

        self.paths.commit().await?;
        Ok(CompletedTransfer {
            path: self.paths.target.clone(),
            bytes: downloaded,
            sha256: hex::encode(hasher.finalize()),
            resumed_from,
        })
    }

    /// Issue the GET, retrying send errors with linear backoff.
    async fn send(&self, offset: u64, if_range: Option<&str>) -> Result<Response, AssetError> {
        let mut attempt = 0u32;
        loop {
            let mut request = self.client.get(self.url.clone());
            if offset > 0 {
                request = request.header(header::RANGE, format!("bytes={offset}-"));
                if let Some(validator) = if_range {
                    request = request.header(header::IF_RANGE, validator);
                }
            }

            let sent = tokio::select! {
                sent = request.send() => sent,
                _ = self.cancel.cancelled() => return Err(AssetError::Canceled),
                _ = idle(self.tuning.idle_timeout) => {
                    let secs = self.tuning.idle_timeout_secs().unwrap_or_default();
                    warn!(url = %self.redacted, "download request got no response within {secs}s");
                    return Err(AssetError::download(
                        "request-timeout",
                        format!("no response within {secs} seconds"),
                    ));
                }
            };
            match sent {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    error!(url = %self.redacted, %status, "download http error");
                    return Err(AssetError::download("http", status.to_string()));
                }
                Err(err) if attempt < self.tuning.send_retries => {
                    attempt += 1;
                    let delay = self.tuning.backoff_delay(attempt);
                    warn!(
                        url = %self.redacted,
                        "download send error (attempt {attempt}): {err}; retrying in {delay:?}"
                    );
                    self.sleep(delay).await?;
                }
                Err(err) => {
                    error!(url = %self.redacted, "download request error: {err}");
                    let code = if err.is_timeout() {
                        "request-timeout"
                    } else {
                        "http"
                    };
                    return Err(AssetError::download(code, err.to_string()));
                }
            }
        }
    }

    /// Open the partial for the body about to stream. Returns the file and the
    /// offset the body starts at; a full-body answer truncates the partial and
    /// resets the hasher.
    async fn open_body(
        &self,
        response: &Response,
        offset: u64,
        hasher: &mut Sha256,
    ) -> Result<(fs::File, u64), AssetError> {
        let status = response.status();
        if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            if !content_range_starts_at(offset, response.headers()) {
                warn!(url = %self.redacted, "Content-Range mismatch when resuming; aborting resume");
                return Err(AssetError::download(
                    "resume-content-range",
                    "server provided mismatched Content-Range for resume",
                ));
            }
            let file = fs::OpenOptions::new()
                .append(true)
                .open(&self.paths.part)
                .await
                .map_err(io_failure)?;
            return Ok((file, offset));
        }
        if offset > 0 && status != StatusCode::OK {
            return Err(AssetError::download(
                "resume-http-status",
                format!("unexpected status {status} for resume"),
            ));
        }
        if offset > 0 {
            debug!(url = %self.redacted, "server ignored range; restarting from zero");
        }
        let file = fs::File::create(&self.paths.part)
            .await
            .map_err(io_failure)?;
        *hasher = Sha256::new();
        Ok((file, 0))
    }

    fn check_declared_size(&self, total: Option<u64>) -> Result<(), AssetError> {
        let Some(total_bytes) = total else {
            return Ok(());
        };
        if let Some(max) = self.tuning.max_bytes {
            if total_bytes > max {
                return Err(AssetError::download(
                    "size-limit",
                    format!("download size {total_bytes} exceeds max {max}"),
                ));
            }
        }
        let reserve = self.tuning.disk_reserve_bytes;
        if reserve > 0 {
            if let Ok(avail) = available_space_near(&self.paths.target) {
                if avail <= reserve {
                    return Err(AssetError::download(
                        "disk-insufficient",
                        format!("available disk {avail} <= reserve {reserve}"),
                    ));
                }
                if avail.saturating_sub(reserve) < total_bytes {
                    return Err(AssetError::download(
                        "disk-insufficient",
                        format!(
                            "not enough free space for download: need {total_bytes} + reserve {reserve}, only {avail} available"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn sleep(&self, delay: std::time::Duration) -> Result<(), AssetError> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(AssetError::Canceled),
        }
    }
}

async fn idle(timeout: Option<std::time::Duration>) {
    match timeout {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending::<()>().await,
    }
}

fn io_failure(err: std::io::Error) -> AssetError {
    AssetError::download("io", err.to_string())
}

async fn save_resume_validators(meta_path: &Path, headers: &header::HeaderMap) {
    let etag = headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let last_modified = headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    if etag.is_none() && last_modified.is_none() {
        return;
    }
    let mut map = Map::new();
    if let Some(e) = etag {
        map.insert("etag".into(), Value::String(e));
    }
    if let Some(lm) = last_modified {
        map.insert("last_modified".into(), Value::String(lm));
    }
    if let Ok(bytes) = serde_json::to_vec(&Value::Object(map)) {
        let _ = fs::write(meta_path, bytes).await;
    }
}

async fn load_resume_if_range(meta_path: &Path) -> Option<String> {
    let bytes = fs::read(meta_path).await.ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value
        .get("etag")
        .or_else(|| value.get("last_modified"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn content_range_starts_at(offset: u64, headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes "))
        .and_then(|rest| rest.split('/').next())
        .and_then(|range| range.split('-').next())
        .and_then(|start| start.trim().parse::<u64>().ok())
        .is_some_and(|start| start == offset)
}
