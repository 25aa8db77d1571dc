//! Embedded database of produced index artifacts.
//!
//! A single redb table keyed by `{image_digest}|{platform}|{index_digest}`
//! with JSON-serialized [`ArtifactEntry`] values.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use soci_wrapper_core::error::{Result, SociError};

use crate::oci::{Descriptor, Platform};

/// Index artifacts keyed by `{image_digest}|{platform}|{index_digest}`.
const SOCI_INDICES: TableDefinition<&str, &[u8]> = TableDefinition::new("soci_indices");

/// One index artifact recorded for an image/platform pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Descriptor of the index manifest
    pub descriptor: Descriptor,
    /// Digest of the image manifest the index was built from
    pub image_digest: String,
    /// Image name (`repository@digest`)
    pub image_name: String,
    /// Platform the index was built for
    pub platform: Platform,
    /// When the index was built
    pub created_at: DateTime<Utc>,
}

impl ArtifactEntry {
    fn key(&self) -> String {
        format!("{}{}", key_prefix(&self.image_digest, &self.platform), self.descriptor.digest)
    }
}

fn key_prefix(image_digest: &str, platform: &Platform) -> String {
    format!("{}|{}|", image_digest, platform)
}

fn db_err(e: impl std::fmt::Display) -> SociError {
    SociError::StorageError(format!("artifacts database: {}", e))
}

/// Metadata database mapping (image, platform) to produced index artifacts.
pub struct ArtifactsDb {
    db: Database,
    path: PathBuf,
}

impl ArtifactsDb {
    /// Open the database at `path`, creating it if absent.
    pub fn open(path: &Path) -> Result<Self> {
        let init_err = |e: &dyn std::fmt::Display| SociError::StorageInitError {
            store: path.display().to_string(),
            message: e.to_string(),
        };

        let db = Database::create(path).map_err(|e| init_err(&e))?;

        // Create the table up front so read transactions never see it missing.
        let txn = db.begin_write().map_err(|e| init_err(&e))?;
        txn.open_table(SOCI_INDICES).map_err(|e| init_err(&e))?;
        txn.commit().map_err(|e| init_err(&e))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an artifact. Re-recording the same index for the same image and
    /// platform replaces the earlier entry.
    pub fn record(&self, entry: &ArtifactEntry) -> Result<()> {
        let key = entry.key();
        let value = serde_json::to_vec(entry)?;

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(SOCI_INDICES).map_err(db_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;

        tracing::debug!(
            index_digest = %entry.descriptor.digest,
            image = %entry.image_name,
            platform = %entry.platform,
            "Recorded SOCI index artifact"
        );
        Ok(())
    }

    /// All artifacts recorded for an image on a platform, in key order.
    pub fn entries_for(&self, image_digest: &str, platform: &Platform) -> Result<Vec<ArtifactEntry>> {
        let prefix = key_prefix(image_digest, platform);

        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(SOCI_INDICES).map_err(db_err)?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(db_err)? {
            let (key, value) = item.map_err(db_err)?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let entry: ArtifactEntry = serde_json::from_slice(value.value())?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Number of recorded artifacts across all images.
    pub fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(SOCI_INDICES).map_err(db_err)?;
        let mut count = 0;
        for item in table.iter().map_err(db_err)? {
            item.map_err(db_err)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::descriptor::OCI_IMAGE_MANIFEST;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry(image_digest: &str, platform: Platform, index: &[u8], secs: i64) -> ArtifactEntry {
        ArtifactEntry {
            descriptor: Descriptor::for_bytes(OCI_IMAGE_MANIFEST, index),
            image_digest: image_digest.to_string(),
            image_name: format!("app@{}", image_digest),
            platform,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_open_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifacts.db");
        let db = ArtifactsDb::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
        assert!(db.is_empty().unwrap());
    }

    #[test]
    fn test_record_and_list() {
        let tmp = TempDir::new().unwrap();
        let db = ArtifactsDb::open(&tmp.path().join("artifacts.db")).unwrap();
        let amd64 = Platform::new("linux", "amd64");

        db.record(&entry("sha256:img", amd64.clone(), b"one", 1)).unwrap();
        db.record(&entry("sha256:img", amd64.clone(), b"two", 2)).unwrap();

        let entries = db.entries_for("sha256:img", &amd64).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.image_digest == "sha256:img"));
    }

    #[test]
    fn test_list_filters_image_and_platform() {
        let tmp = TempDir::new().unwrap();
        let db = ArtifactsDb::open(&tmp.path().join("artifacts.db")).unwrap();
        let amd64 = Platform::new("linux", "amd64");
        let arm64 = Platform::new("linux", "arm64");

        db.record(&entry("sha256:img", amd64.clone(), b"a", 1)).unwrap();
        db.record(&entry("sha256:img", arm64.clone(), b"b", 1)).unwrap();
        db.record(&entry("sha256:other", amd64.clone(), b"c", 1)).unwrap();

        assert_eq!(db.entries_for("sha256:img", &amd64).unwrap().len(), 1);
        assert_eq!(db.entries_for("sha256:img", &arm64).unwrap().len(), 1);
        assert!(db
            .entries_for("sha256:missing", &amd64)
            .unwrap()
            .is_empty());
        assert_eq!(db.len().unwrap(), 3);
    }

    #[test]
    fn test_rerecord_replaces_entry() {
        let tmp = TempDir::new().unwrap();
        let db = ArtifactsDb::open(&tmp.path().join("artifacts.db")).unwrap();
        let amd64 = Platform::new("linux", "amd64");

        db.record(&entry("sha256:img", amd64.clone(), b"same", 1)).unwrap();
        db.record(&entry("sha256:img", amd64.clone(), b"same", 5)).unwrap();

        let entries = db.entries_for("sha256:img", &amd64).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].created_at.timestamp(), 5);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifacts.db");
        let amd64 = Platform::new("linux", "amd64");
        {
            let db = ArtifactsDb::open(&path).unwrap();
            db.record(&entry("sha256:img", amd64.clone(), b"kept", 1)).unwrap();
        }
        let db = ArtifactsDb::open(&path).unwrap();
        assert_eq!(db.entries_for("sha256:img", &amd64).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_init_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("artifacts.db");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();
        let err = ArtifactsDb::open(&path).err().unwrap();
        assert!(matches!(err, SociError::StorageInitError { .. }));
    }
}
