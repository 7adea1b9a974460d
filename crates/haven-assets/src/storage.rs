//! Filesystem adapter rooted at the managed asset directory.
//!
//! Every path handed out by [`AssetStorage::path_for`] is a direct child of the
//! root; filenames that could escape it are rejected.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::AssetError;

/// Result of [`AssetStorage::stat_file`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStat {
    Missing,
    Present { size: u64 },
}

impl FileStat {
    pub fn exists(&self) -> bool {
        matches!(self, FileStat::Present { .. })
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            FileStat::Present { size } => Some(*size),
            FileStat::Missing => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AssetStorage {
    root: PathBuf,
}

impl AssetStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the managed directory (and parents) if absent.
    pub async fn ensure_directory(&self) -> Result<(), AssetError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AssetError::storage("create asset dir", e))
    }

    /// Resolve a bare filename to its location under the managed directory.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, AssetError> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    pub async fn read_text(&self, path: &Path) -> Result<String, AssetError> {
        fs::read_to_string(path)
            .await
            .map_err(|e| AssetError::storage(&format!("read {}", path.display()), e))
    }

    pub async fn write_text(&self, path: &Path, content: &str) -> Result<(), AssetError> {
        self.write_bytes(path, content.as_bytes()).await
    }

    pub async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), AssetError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AssetError::storage("create asset dir", e))?;
        }
        fs::write(path, bytes)
            .await
            .map_err(|e| AssetError::storage(&format!("write {}", path.display()), e))
    }

    /// Remove a file; a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), AssetError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed asset file");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AssetError::storage(
                &format!("delete {}", path.display()),
                err,
            )),
        }
    }

    pub async fn stat_file(&self, path: &Path) -> Result<FileStat, AssetError> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(FileStat::Present { size: meta.len() }),
            Ok(_) => Ok(FileStat::Missing),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileStat::Missing),
            Err(err) => Err(AssetError::storage(
                &format!("stat {}", path.display()),
                err,
            )),
        }
    }

    /// Atomically replace `to` with `from`.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), AssetError> {
        fs::rename(from, to).await.map_err(|e| {
            AssetError::storage(
                &format!("rename {} -> {}", from.display(), to.display()),
                e,
            )
        })
    }

    /// Free bytes on the volume holding the managed directory.
    pub fn available_space(&self) -> Result<u64, AssetError> {
        available_space_near(&self.root)
    }
}

pub(crate) fn available_space_near(path: &Path) -> Result<u64, AssetError> {
    let probe = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("."));
    fs2::available_space(probe).map_err(|e| AssetError::storage("query free space", e))
}

fn validate_filename(filename: &str) -> Result<(), AssetError> {
    let invalid = || AssetError::InvalidFilename(filename.to_string());
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(invalid());
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn path_for_stays_under_root() {
        let storage = AssetStorage::new("/data/assets");
        assert_eq!(
            storage.path_for("model.bin").unwrap(),
            PathBuf::from("/data/assets/model.bin")
        );
        for bad in [
            "",
            "..",
            ".",
            "../model.bin",
            "nested/model.bin",
            "/etc/passwd",
            "..\\model.bin",
            "mo\0del",
        ] {
            assert!(
                matches!(storage.path_for(bad), Err(AssetError::InvalidFilename(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let storage = AssetStorage::new(tmp.path().join("a").join("b"));
        storage.ensure_directory().await.expect("first create");
        storage.ensure_directory().await.expect("second create");
        assert!(storage.root().is_dir());
    }

    #[tokio::test]
    async fn delete_missing_file_is_ok() {
        let tmp = tempdir().expect("tempdir");
        let storage = AssetStorage::new(tmp.path());
        let path = storage.path_for("absent.bin").unwrap();
        storage.delete(&path).await.expect("first delete");
        storage.delete(&path).await.expect("second delete");
    }

    #[tokio::test]
    async fn stat_reports_size_and_absence() {
        let tmp = tempdir().expect("tempdir");
        let storage = AssetStorage::new(tmp.path());
        let path = storage.path_for("model.bin").unwrap();
        assert_eq!(storage.stat_file(&path).await.unwrap(), FileStat::Missing);

        storage.write_bytes(&path, &[7u8; 42]).await.unwrap();
        let stat = storage.stat_file(&path).await.unwrap();
        assert!(stat.exists());
        assert_eq!(stat.size(), Some(42));

        storage.delete(&path).await.unwrap();
        assert!(!storage.stat_file(&path).await.unwrap().exists());
    }

    #[tokio::test]
    async fn text_round_trips_and_creates_parent() {
        let tmp = tempdir().expect("tempdir");
        let storage = AssetStorage::new(tmp.path().join("fresh"));
        let path = storage.path_for("notes.txt").unwrap();
        storage.write_text(&path, "hello").await.unwrap();
        assert_eq!(storage.read_text(&path).await.unwrap(), "hello");
    }

    #[test]
    fn available_space_probes_existing_ancestor() {
        let tmp = tempdir().expect("tempdir");
        let storage = AssetStorage::new(tmp.path().join("not").join("yet"));
        assert!(storage.available_space().expect("free space") > 0);
    }
}
