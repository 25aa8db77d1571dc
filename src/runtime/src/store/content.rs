//! Digest-addressed blob store.
//!
//! Blobs live at `<root>/blobs/<algorithm>/<hex>`. Every write is verified
//! against the expected digest and size, staged under `<root>/ingest/` and
//! renamed into place, so a blob path either holds verified content or does
//! not exist.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Sha256, Sha384, Sha512};
use soci_wrapper_core::error::{Result, SociError};

use crate::oci::{Descriptor, ImageDigest};

/// Blob store keyed by content digest.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) a content store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        for dir in [root.join("blobs"), root.join("ingest")] {
            std::fs::create_dir_all(&dir).map_err(|e| SociError::StorageInitError {
                store: "content store".to_string(),
                message: format!("Failed to create {}: {}", dir.display(), e),
            })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for `digest`, whether or not it exists yet.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let digest = parse_digest(digest)?;
        Ok(self
            .root
            .join("blobs")
            .join(digest.algorithm())
            .join(digest.encoded()))
    }

    /// Staging path used while a blob for `digest` is being downloaded.
    pub fn ingest_path(&self, digest: &str) -> Result<PathBuf> {
        let digest = parse_digest(digest)?;
        Ok(self
            .root
            .join("ingest")
            .join(format!("{}-{}", digest.algorithm(), digest.encoded())))
    }

    /// Whether a blob is present.
    pub fn exists(&self, digest: &str) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Size on disk of a blob, if present.
    pub fn size(&self, digest: &str) -> Option<u64> {
        let path = self.blob_path(digest).ok()?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    /// Read an entire blob into memory.
    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        std::fs::read(&path).map_err(|e| {
            SociError::StorageError(format!("Failed to read blob {}: {}", digest, e))
        })
    }

    /// Write `data` as the blob described by `expected`.
    ///
    /// Already-present blobs are left untouched.
    pub fn write(&self, expected: &Descriptor, data: &[u8]) -> Result<()> {
        if self.exists(&expected.digest) {
            return Ok(());
        }

        let ingest = self.ingest_path(&expected.digest)?;
        let mut file = File::create(&ingest).map_err(|e| {
            SociError::StorageError(format!("Failed to create {}: {}", ingest.display(), e))
        })?;
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                SociError::StorageError(format!("Failed to write {}: {}", ingest.display(), e))
            })?;
        drop(file);

        self.commit(expected)
    }

    /// Verify the staged file for `expected` and move it into place.
    ///
    /// The staged file is removed if verification fails.
    pub fn commit(&self, expected: &Descriptor) -> Result<()> {
        let ingest = self.ingest_path(&expected.digest)?;
        let target = self.blob_path(&expected.digest)?;

        if let Err(e) = verify_file(&ingest, expected) {
            let _ = std::fs::remove_file(&ingest);
            return Err(e);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SociError::StorageError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::rename(&ingest, &target).map_err(|e| {
            SociError::StorageError(format!(
                "Failed to commit blob {} -> {}: {}",
                ingest.display(),
                target.display(),
                e
            ))
        })?;

        tracing::debug!(digest = %expected.digest, size = expected.size, "Committed blob");
        Ok(())
    }

    /// Remove a blob. Returns true if it existed.
    pub fn delete(&self, digest: &str) -> Result<bool> {
        let path = self.blob_path(digest)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SociError::StorageError(format!(
                "Failed to delete blob {}: {}",
                digest, e
            ))),
        }
    }
}

fn parse_digest(digest: &str) -> Result<ImageDigest> {
    ImageDigest::parse(digest)
        .map_err(|e| SociError::StorageError(format!("Invalid blob digest: {}", e)))
}

/// Check a file's size and digest against a descriptor.
fn verify_file(path: &Path, expected: &Descriptor) -> Result<()> {
    let size = std::fs::metadata(path)
        .map_err(|e| SociError::StorageError(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();
    if expected.size >= 0 && size != expected.size as u64 {
        return Err(SociError::StorageError(format!(
            "Size mismatch for {}: expected {}, got {}",
            expected.digest, expected.size, size
        )));
    }

    let digest = parse_digest(&expected.digest)?;
    let mut file = File::open(path)
        .map_err(|e| SociError::StorageError(format!("Failed to open {}: {}", path.display(), e)))?;
    let actual = match digest.algorithm() {
        "sha256" => hash_reader::<Sha256>(&mut file)?,
        "sha384" => hash_reader::<Sha384>(&mut file)?,
        _ => hash_reader::<Sha512>(&mut file)?,
    };

    if actual != digest.encoded() {
        return Err(SociError::StorageError(format!(
            "Digest mismatch: expected {}, got {}:{}",
            expected.digest,
            digest.algorithm(),
            actual
        )));
    }
    Ok(())
}

fn hash_reader<D: sha2::Digest + Write>(reader: &mut File) -> Result<String> {
    let mut hasher = D::new();
    std::io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
