//! OCI image layout over a content store.
//!
//! ```text
//! store/
//! ├── oci-layout     (layout marker)
//! ├── index.json     (tagged manifests)
//! └── blobs/sha256/  (shared with the content store)
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use soci_wrapper_core::error::{Result, SociError};

use super::content::ContentStore;
use crate::oci::descriptor::ANNOTATION_REF_NAME;
use crate::oci::Descriptor;

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";

/// The layout's `index.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Default for LayoutIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            manifests: Vec::new(),
        }
    }
}

/// OCI-layout artifact store sharing its blobs with a [`ContentStore`].
#[derive(Debug, Clone)]
pub struct OciLayoutStore {
    content: ContentStore,
}

impl OciLayoutStore {
    /// Open (creating if needed) an OCI layout rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let content = ContentStore::open(root).map_err(|e| SociError::StorageInitError {
            store: "artifact store".to_string(),
            message: e.to_string(),
        })?;

        let init_err = |path: &Path, e: std::io::Error| SociError::StorageInitError {
            store: "artifact store".to_string(),
            message: format!("Failed to write {}: {}", path.display(), e),
        };

        let layout_path = root.join(OCI_LAYOUT_FILE);
        if !layout_path.exists() {
            std::fs::write(&layout_path, OCI_LAYOUT_CONTENT)
                .map_err(|e| init_err(&layout_path, e))?;
        }

        let index_path = root.join(INDEX_FILE);
        if !index_path.exists() {
            let data = serde_json::to_string_pretty(&LayoutIndex::default())?;
            std::fs::write(&index_path, data).map_err(|e| init_err(&index_path, e))?;
        }

        Ok(Self { content })
    }

    /// Blob storage backing this layout.
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn root(&self) -> &Path {
        self.content.root()
    }

    /// Store a blob.
    pub fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<()> {
        self.content.write(descriptor, data)
    }

    /// Read a blob.
    pub fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.content.read(&descriptor.digest)
    }

    pub fn exists(&self, descriptor: &Descriptor) -> bool {
        self.content.exists(&descriptor.digest)
    }

    /// Record a manifest in `index.json` under `reference`.
    ///
    /// Any previous entry with the same reference is replaced.
    pub fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        if !self.exists(descriptor) {
            return Err(SociError::StorageError(format!(
                "Cannot tag {}: blob not in store",
                descriptor.digest
            )));
        }

        let mut index = self.load_index()?;
        index.manifests.retain(|m| {
            m.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) != Some(reference)
        });
        index.manifests.push(
            descriptor
                .clone()
                .with_annotation(ANNOTATION_REF_NAME, reference),
        );
        self.save_index(&index)
    }

    /// Look up a manifest by the reference it was tagged with.
    pub fn resolve(&self, reference: &str) -> Result<Option<Descriptor>> {
        let index = self.load_index()?;
        Ok(index.manifests.into_iter().find(|m| {
            m.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) == Some(reference)
        }))
    }

    /// All manifests recorded in `index.json`.
    pub fn manifests(&self) -> Result<Vec<Descriptor>> {
        Ok(self.load_index()?.manifests)
    }

    fn index_path(&self) -> PathBuf {
        self.root().join(INDEX_FILE)
    }

    fn load_index(&self) -> Result<LayoutIndex> {
        let path = self.index_path();
        let data = std::fs::read_to_string(&path).map_err(|e| {
            SociError::StorageError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            SociError::StorageError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Save `index.json` atomically (write tmp, rename).
    fn save_index(&self, index: &LayoutIndex) -> Result<()> {
        let path = self.index_path();
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(index)?;
        std::fs::write(&tmp_path, data).map_err(|e| {
            SociError::StorageError(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            SociError::StorageError(format!(
                "Failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })
    }
}
