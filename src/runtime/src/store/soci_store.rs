//! GC-aware adapter over the OCI layout store.
//!
//! The index builder needs an artifact store that also tracks garbage
//! collection references: which blobs are roots and which blobs a manifest
//! keeps alive. Labels are persisted next to the layout in `labels.json`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use soci_wrapper_core::error::{Result, SociError};

use super::content::ContentStore;
use super::layout::OciLayoutStore;
use crate::oci::Descriptor;

/// Label marking a blob as a garbage collection root.
pub const LABEL_GC_ROOT: &str = "containerd.io/gc.root";
/// Prefix of labels pointing at content a blob keeps alive.
pub const LABEL_GC_REF_CONTENT: &str = "containerd.io/gc.ref.content";

const LABELS_FILE: &str = "labels.json";

type LabelMap = HashMap<String, BTreeMap<String, String>>;

/// Artifact store used by the index builder and the registry client.
pub struct SociStore {
    layout: OciLayoutStore,
    labels: Mutex<LabelMap>,
}

impl SociStore {
    /// Wrap an opened layout, loading any persisted labels.
    pub fn new(layout: OciLayoutStore) -> Result<Self> {
        let path = layout.root().join(LABELS_FILE);
        let labels = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| {
                SociError::StorageInitError {
                    store: "artifact store".to_string(),
                    message: format!("Failed to read {}: {}", path.display(), e),
                }
            })?;
            serde_json::from_str(&data).map_err(|e| SociError::StorageInitError {
                store: "artifact store".to_string(),
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?
        } else {
            LabelMap::new()
        };

        Ok(Self {
            layout,
            labels: Mutex::new(labels),
        })
    }

    pub fn layout(&self) -> &OciLayoutStore {
        &self.layout
    }

    pub fn content(&self) -> &ContentStore {
        self.layout.content()
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<()> {
        self.layout.push(descriptor, data)
    }

    pub fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.layout.fetch(descriptor)
    }

    pub fn exists(&self, descriptor: &Descriptor) -> bool {
        self.layout.exists(descriptor)
    }

    pub fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        self.layout.tag(descriptor, reference)
    }

    pub fn resolve(&self, reference: &str) -> Result<Option<Descriptor>> {
        self.layout.resolve(reference)
    }

    /// Attach a label to a stored blob.
    pub fn label(&self, descriptor: &Descriptor, key: &str, value: &str) -> Result<()> {
        if !self.exists(descriptor) {
            return Err(SociError::StorageError(format!(
                "Cannot label {}: blob not in store",
                descriptor.digest
            )));
        }
        let mut labels = self.labels.lock();
        labels
            .entry(descriptor.digest.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.save_labels(&labels)
    }

    /// Labels attached to a blob.
    pub fn labels(&self, digest: &str) -> BTreeMap<String, String> {
        self.labels.lock().get(digest).cloned().unwrap_or_default()
    }

    /// Whether a blob is labelled as a GC root.
    pub fn is_gc_root(&self, digest: &str) -> bool {
        self.labels.lock()
            .get(digest)
            .map_or(false, |l| l.contains_key(LABEL_GC_ROOT))
    }

    /// Remove a blob and its labels.
    pub fn delete(&self, descriptor: &Descriptor) -> Result<()> {
        self.content().delete(&descriptor.digest)?;
        let mut labels = self.labels.lock();
        if labels.remove(&descriptor.digest).is_some() {
            self.save_labels(&labels)?;
        }
        Ok(())
    }

    fn labels_path(&self) -> PathBuf {
        self.root().join(LABELS_FILE)
    }

    fn save_labels(&self, labels: &LabelMap) -> Result<()> {
        let path = self.labels_path();
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(labels)?;
        std::fs::write(&tmp_path, data)
            .and_then(|_| std::fs::rename(&tmp_path, &path))
            .map_err(|e| {
                SociError::StorageError(format!("Failed to save {}: {}", path.display(), e))
            })
    }
}
