//! JSON descriptor describing the installed asset.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AssetError;
use crate::storage::AssetStorage;

pub const DEFAULT_METADATA_FILE: &str = "model-meta.json";

/// Descriptor persisted next to the asset.
///
/// Presence on disk only means an install ran to completion; validity is
/// established by the verifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetMetadata {
    pub filename: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// SHA-256 hex digest of the asset content.
    #[serde(default, rename = "sha256", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(
        default,
        rename = "lastUpdated",
        skip_serializing_if = "Option::is_none",
        with = "millis_rfc3339"
    )]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AssetMetadata {
    pub fn new(filename: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            version: version.into(),
            size: None,
            checksum: None,
            last_updated: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksum(mut self, sha256: impl Into<String>) -> Self {
        self.checksum = Some(sha256.into());
        self
    }

    pub fn touch(mut self) -> Self {
        self.last_updated = Some(Utc::now());
        self
    }
}

/// Caller-supplied expectations for a download; becomes [`AssetMetadata`] once
/// the transfer completes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetSpec {
    pub version: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
}

impl AssetSpec {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_checksum(mut self, sha256: impl Into<String>) -> Self {
        self.checksum = Some(sha256.into());
        self
    }

    pub(crate) fn into_metadata(self, filename: &str) -> AssetMetadata {
        AssetMetadata {
            filename: filename.to_string(),
            version: self.version,
            size: self.size,
            checksum: self.checksum,
            last_updated: None,
        }
        .touch()
    }
}

/// Timestamps are written with millisecond precision so a save/load cycle is
/// lossless.
mod millis_rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => ser.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            Some(s) => s
                .parse::<DateTime<Utc>>()
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetadataStore {
    storage: AssetStorage,
    file_name: String,
}

impl MetadataStore {
    pub fn new(storage: AssetStorage, file_name: impl Into<String>) -> Self {
        Self {
            storage,
            file_name: file_name.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Read the descriptor. Missing or unparsable files yield `None`.
    pub async fn load(&self) -> Option<AssetMetadata> {
        let path = self.storage.path_for(&self.file_name).ok()?;
        if !self.storage.stat_file(&path).await.ok()?.exists() {
            return None;
        }
        let raw = match self.storage.read_text(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "asset descriptor unreadable; treating as absent");
                return None;
            }
        };
        match serde_json::from_str::<AssetMetadata>(&raw) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(path = %path.display(), %err, "asset descriptor corrupt; treating as absent");
                None
            }
        }
    }

    /// Persist the descriptor through a temporary sibling and a rename.
    pub async fn save(&self, meta: &AssetMetadata) -> Result<(), AssetError> {
        let path = self.storage.path_for(&self.file_name)?;
        let tmp = path.with_file_name(format!(
            "{}.{}.tmp",
            self.file_name,
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true).replace(':', "-")
        ));
        let body = serde_json::to_vec_pretty(meta)
            .map_err(|e| AssetError::storage("encode asset descriptor", e))?;
        self.storage.write_bytes(&tmp, &body).await?;
        if let Err(err) = self.storage.rename(&tmp, &path).await {
            let _ = self.storage.delete(&tmp).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), AssetError> {
        let path = self.storage.path_for(&self.file_name)?;
        self.storage.delete(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store_in(dir: &std::path::Path) -> MetadataStore {
        MetadataStore::new(AssetStorage::new(dir), DEFAULT_METADATA_FILE)
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let tmp = tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        let meta = AssetMetadata::new("model.bin", "1.0")
            .with_size(100_000)
            .with_checksum("ab".repeat(32))
            .touch();

        store.save(&meta).await.expect("save");
        let loaded = store.load().await.expect("descriptor present");
        assert_eq!(loaded.filename, meta.filename);
        assert_eq!(loaded.version, meta.version);
        assert_eq!(loaded.size, meta.size);
        assert_eq!(loaded.checksum, meta.checksum);
        assert_eq!(
            loaded.last_updated.map(|t| t.timestamp_millis()),
            meta.last_updated.map(|t| t.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn missing_descriptor_loads_as_none() {
        let tmp = tempdir().expect("tempdir");
        assert!(store_in(tmp.path()).load().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_descriptor_loads_as_none() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(tmp.path().join(DEFAULT_METADATA_FILE), b"{\"filename\": \"mod")
            .expect("write corrupt");
        assert!(store_in(tmp.path()).load().await.is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        store
            .save(&AssetMetadata::new("model.bin", "1.0"))
            .await
            .expect("save");
        store.clear().await.expect("first clear");
        store.clear().await.expect("second clear");
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let tmp = tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        store
            .save(&AssetMetadata::new("model.bin", "1.0"))
            .await
            .expect("save");
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![DEFAULT_METADATA_FILE.to_string()]);
    }

    #[test]
    fn wire_format_uses_sha256_and_last_updated() {
        let ts = "2025-03-01T08:30:00.125Z".parse::<DateTime<Utc>>().unwrap();
        let meta = AssetMetadata {
            filename: "model.bin".into(),
            version: "1.0".into(),
            size: Some(10),
            checksum: Some("deadbeef".into()),
            last_updated: Some(ts),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            value,
            json!({
                "filename": "model.bin",
                "version": "1.0",
                "size": 10,
                "sha256": "deadbeef",
                "lastUpdated": "2025-03-01T08:30:00.125Z",
            })
        );

        let sparse: AssetMetadata =
            serde_json::from_value(json!({"filename": "model.bin", "version": "2"})).unwrap();
        assert_eq!(sparse, AssetMetadata::new("model.bin", "2"));
    }
}
