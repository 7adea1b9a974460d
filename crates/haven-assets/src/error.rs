use std::path::PathBuf;

/// Failures surfaced by the asset lifecycle components.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("download already in progress for {0}")]
    AlreadyInProgress(String),
    #[error("download failed ({code}): {message}")]
    DownloadFailed { code: &'static str, message: String },
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("storage failure: {0}")]
    StorageFailed(String),
    #[error("invalid asset filename: {0:?}")]
    InvalidFilename(String),
    #[error("download canceled")]
    Canceled,
    #[error("asset directory already managed: {}", .0.display())]
    TargetClaimed(PathBuf),
}

impl AssetError {
    pub(crate) fn download(code: &'static str, message: impl Into<String>) -> Self {
        AssetError::DownloadFailed {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        AssetError::StorageFailed(format!("{context}: {err}"))
    }

    /// Short machine-readable slug, mirrors the `code` carried by download failures.
    pub fn code(&self) -> &'static str {
        match self {
            AssetError::AlreadyInProgress(_) => "already-in-progress",
            AssetError::DownloadFailed { code, .. } => code,
            AssetError::VerificationFailed(_) => "verification-failed",
            AssetError::StorageFailed(_) => "storage",
            AssetError::InvalidFilename(_) => "invalid-filename",
            AssetError::Canceled => "canceled",
            AssetError::TargetClaimed(_) => "target-claimed",
        }
    }
}
