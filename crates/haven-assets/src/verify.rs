//! Integrity checks for installed assets.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::AssetError;
use crate::metadata::AssetMetadata;
use crate::storage::{AssetStorage, FileStat};

const HASH_BUF_BYTES: usize = 64 * 1024;

/// Outcome of [`IntegrityVerifier::check`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verification {
    Passed,
    Missing,
    SizeMismatch { expected: u64, actual: u64 },
    ChecksumMismatch { expected: String, actual: String },
    ChecksumRequired,
    Unreadable { reason: String },
}

impl Verification {
    pub fn passed(&self) -> bool {
        matches!(self, Verification::Passed)
    }

    pub fn describe(&self) -> String {
        match self {
            Verification::Passed => "passed".into(),
            Verification::Missing => "asset file missing".into(),
            Verification::SizeMismatch { expected, actual } => {
                format!("size mismatch: expected {expected} bytes, found {actual}")
            }
            Verification::ChecksumMismatch { expected, actual } => {
                format!("sha256 mismatch: expected {expected}, got {actual}")
            }
            Verification::ChecksumRequired => "checksum-required: descriptor has no sha256".into(),
            Verification::Unreadable { reason } => format!("asset unreadable: {reason}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntegrityVerifier {
    storage: AssetStorage,
    require_checksum: bool,
}

impl IntegrityVerifier {
    pub fn new(storage: AssetStorage) -> Self {
        Self {
            storage,
            require_checksum: false,
        }
    }

    /// Strict mode: a descriptor without `sha256` fails instead of skipping the
    /// content check.
    pub fn require_checksum(mut self, strict: bool) -> Self {
        self.require_checksum = strict;
        self
    }

    pub async fn verify(&self, meta: &AssetMetadata) -> bool {
        self.check(meta).await.passed()
    }

    pub async fn check(&self, meta: &AssetMetadata) -> Verification {
        let path = match self.storage.path_for(&meta.filename) {
            Ok(path) => path,
            Err(err) => {
                warn!(%err, "descriptor names an invalid file");
                return Verification::Unreadable {
                    reason: err.to_string(),
                };
            }
        };

        let actual_size = match self.storage.stat_file(&path).await {
            Ok(FileStat::Present { size }) => size,
            Ok(FileStat::Missing) => return Verification::Missing,
            Err(err) => {
                return Verification::Unreadable {
                    reason: err.to_string(),
                }
            }
        };

        if let Some(expected) = meta.size {
            if expected != actual_size {
                return Verification::SizeMismatch {
                    expected,
                    actual: actual_size,
                };
            }
        }

        match meta.checksum.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(expected) => match sha256_file(&path).await {
                Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
                Ok(actual) => {
                    return Verification::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    }
                }
                Err(err) => {
                    return Verification::Unreadable {
                        reason: err.to_string(),
                    }
                }
            },
            None if self.require_checksum => return Verification::ChecksumRequired,
            None => {}
        }

        debug!(file = %meta.filename, bytes = actual_size, "asset verified");
        Verification::Passed
    }
}

/// Streaming SHA-256 of a file, lowercase hex.
pub async fn sha256_file(path: &Path) -> Result<String, AssetError> {
    let mut hasher = Sha256::new();
    hash_into(path, &mut hasher).await?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) async fn hash_into(path: &Path, hasher: &mut Sha256) -> Result<(), AssetError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AssetError::storage(&format!("open {}", path.display()), e))?;
    let mut reader = BufReader::new(file);
    let mut buf = vec![0u8; HASH_BUF_BYTES];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| AssetError::storage(&format!("read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(())
}
