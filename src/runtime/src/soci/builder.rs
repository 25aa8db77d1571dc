//! SOCI index construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oci_distribution::client::{Config, ImageLayer};
use oci_distribution::manifest::OciImageManifest;
use soci_wrapper_core::error::{Result, SociError};

use super::ztoc;
use crate::oci::descriptor::{
    is_gzip_layer, to_canonical_json, ANNOTATION_BUILD_TOOL, ANNOTATION_IMAGE_LAYER_DIGEST,
    OCI_IMAGE_MANIFEST, SOCI_INDEX_CONFIG, SOCI_ZTOC_LAYER,
};
use crate::oci::{Descriptor, Image, Platform};
use crate::store::{
    ArtifactEntry, ArtifactsDb, ContentStore, SociStore, LABEL_GC_REF_CONTENT, LABEL_GC_ROOT,
};

/// Identifier written into every index and zTOC this crate builds.
pub const BUILD_TOOL_IDENTIFIER: &str = concat!("soci-wrapper v", env!("CARGO_PKG_VERSION"));

/// Index build parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Layers smaller than this (compressed bytes) get no zTOC
    pub min_layer_size: u64,
    /// Platform the index is recorded under
    pub platform: Platform,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_layer_size: 0,
            platform: Platform::default_spec(),
        }
    }
}

/// A recorded index artifact and when it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptorInfo {
    pub descriptor: Descriptor,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactEntry> for IndexDescriptorInfo {
    fn from(entry: ArtifactEntry) -> Self {
        Self {
            descriptor: entry.descriptor,
            created_at: entry.created_at,
        }
    }
}

/// Builds index artifacts for a pulled image.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// Build the index for `image`, writing blobs to `artifacts` and
    /// recording every produced index in `db`.
    async fn build(
        &self,
        image: &Image,
        content: &ContentStore,
        artifacts: &SociStore,
        db: &ArtifactsDb,
        options: &BuildOptions,
    ) -> Result<()>;

    /// Every index recorded for `image` on any of `platforms` whose manifest
    /// is present in `content`.
    fn list_descriptors(
        &self,
        content: &ContentStore,
        db: &ArtifactsDb,
        image: &Image,
        platforms: &[Platform],
    ) -> Result<Vec<IndexDescriptorInfo>>;
}

/// Production [`IndexBuilder`]: one zTOC per gzip layer, collected under an
/// OCI image manifest with the SOCI index config type.
#[derive(Debug, Clone, Default)]
pub struct SociIndexBuilder;

impl SociIndexBuilder {
    pub fn new() -> Self {
        Self
    }

    async fn build_into(
        &self,
        image: &Image,
        content: &ContentStore,
        artifacts: &SociStore,
        db: &ArtifactsDb,
        options: &BuildOptions,
        written: &mut Vec<Descriptor>,
    ) -> Result<()> {
        let raw = content.read(&image.target.digest)?;
        let image_manifest: OciImageManifest = serde_json::from_slice(&raw).map_err(|e| {
            SociError::BuildError(format!(
                "Failed to parse image manifest {}: {}",
                image.target.digest, e
            ))
        })?;

        let mut layers = Vec::new();
        for layer in &image_manifest.layers {
            if !is_gzip_layer(&layer.media_type) {
                tracing::debug!(
                    layer = %layer.digest,
                    media_type = %layer.media_type,
                    "Skipping layer that is not gzip compressed"
                );
                continue;
            }
            if (layer.size.max(0) as u64) < options.min_layer_size {
                tracing::debug!(
                    layer = %layer.digest,
                    size = layer.size,
                    min_layer_size = options.min_layer_size,
                    "Skipping layer below minimum size"
                );
                continue;
            }

            let path = content.blob_path(&layer.digest)?;
            let layer_digest = layer.digest.clone();
            let ztoc = tokio::task::spawn_blocking(move || {
                ztoc::generate_from_path(&path, &layer_digest, BUILD_TOOL_IDENTIFIER)
            })
            .await
            .map_err(|e| SociError::BuildError(format!("zTOC task failed: {}", e)))??;

            let bytes = ztoc.to_bytes()?;
            let ztoc_desc = Descriptor::for_bytes(SOCI_ZTOC_LAYER, &bytes);
            store_new(artifacts, &ztoc_desc, &bytes, written)?;

            tracing::debug!(
                layer = %layer.digest,
                ztoc = %ztoc_desc.digest,
                entries = ztoc.toc.len(),
                "Built zTOC"
            );

            let annotations = [(ANNOTATION_IMAGE_LAYER_DIGEST.to_string(), layer.digest.clone())]
                .into_iter()
                .collect();
            layers.push(ImageLayer::new(
                bytes,
                SOCI_ZTOC_LAYER.to_string(),
                Some(annotations),
            ));
        }

        if layers.is_empty() {
            tracing::info!(
                image = %image.name,
                "No layers qualified for indexing; nothing recorded"
            );
            return Ok(());
        }

        let config = Config::new(b"{}".to_vec(), SOCI_INDEX_CONFIG.to_string(), None);
        let config_desc = Descriptor::for_bytes(SOCI_INDEX_CONFIG, &config.data);
        store_new(artifacts, &config_desc, &config.data, written)?;

        let mut manifest = OciImageManifest::build(
            &layers,
            &config,
            Some(
                [(ANNOTATION_BUILD_TOOL.to_string(), BUILD_TOOL_IDENTIFIER.to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        manifest.media_type = Some(OCI_IMAGE_MANIFEST.to_string());

        let manifest_bytes = to_canonical_json(&manifest)?;
        let manifest_desc = Descriptor::for_bytes(OCI_IMAGE_MANIFEST, &manifest_bytes);
        store_new(artifacts, &manifest_desc, &manifest_bytes, written)?;

        let created_at = Utc::now();
        artifacts.label(&manifest_desc, LABEL_GC_ROOT, &created_at.to_rfc3339())?;
        artifacts.label(
            &manifest_desc,
            &format!("{}.config", LABEL_GC_REF_CONTENT),
            &config_desc.digest,
        )?;
        for (i, layer) in manifest.layers.iter().enumerate() {
            artifacts.label(
                &manifest_desc,
                &format!("{}.l.{}", LABEL_GC_REF_CONTENT, i),
                &layer.digest,
            )?;
        }

        db.record(&ArtifactEntry {
            descriptor: manifest_desc.clone(),
            image_digest: image.target.digest.clone(),
            image_name: image.name.clone(),
            platform: options.platform.clone(),
            created_at,
        })?;

        tracing::info!(
            image = %image.name,
            index_digest = %manifest_desc.digest,
            ztocs = manifest.layers.len(),
            platform = %options.platform,
            "Built SOCI index"
        );
        Ok(())
    }
}

/// Store a blob, remembering it for cleanup if this call created it.
fn store_new(
    artifacts: &SociStore,
    descriptor: &Descriptor,
    data: &[u8],
    written: &mut Vec<Descriptor>,
) -> Result<()> {
    if artifacts.exists(descriptor) {
        return Ok(());
    }
    artifacts.push(descriptor, data)?;
    written.push(descriptor.clone());
    Ok(())
}

#[async_trait]
impl IndexBuilder for SociIndexBuilder {
    async fn build(
        &self,
        image: &Image,
        content: &ContentStore,
        artifacts: &SociStore,
        db: &ArtifactsDb,
        options: &BuildOptions,
    ) -> Result<()> {
        tracing::info!(image = %image.name, platform = %options.platform, "Building SOCI index");

        let mut written = Vec::new();
        let result = self
            .build_into(image, content, artifacts, db, options, &mut written)
            .await;

        if result.is_err() {
            for descriptor in written.iter().rev() {
                if let Err(e) = artifacts.delete(descriptor) {
                    tracing::warn!(
                        digest = %descriptor.digest,
                        error = %e,
                        "Failed to remove blob from failed build"
                    );
                }
            }
        }
        result
    }

    fn list_descriptors(
        &self,
        content: &ContentStore,
        db: &ArtifactsDb,
        image: &Image,
        platforms: &[Platform],
    ) -> Result<Vec<IndexDescriptorInfo>> {
        let mut infos = Vec::new();
        for platform in platforms {
            for entry in db.entries_for(&image.target.digest, platform)? {
                if !content.exists(&entry.descriptor.digest) {
                    tracing::debug!(
                        index_digest = %entry.descriptor.digest,
                        "Recorded index missing from content store"
                    );
                    continue;
                }
                infos.push(entry.into());
            }
        }
        Ok(infos)
    }
}
