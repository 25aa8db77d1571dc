//! OCI registry client for validating, pulling and pushing images.
//!
//! [`RegistryClient`] is the seam the pipeline talks to. [`EcrRegistry`] is
//! the production implementation over the `oci-distribution` crate.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use oci_distribution::{Client, Reference};
use soci_wrapper_core::error::{Result, SociError};
use tokio::io::AsyncWriteExt;

use super::credentials::RegistryAuth;
use super::descriptor::{
    is_image_manifest, is_index, to_canonical_json, Descriptor, ACCEPTED_MANIFEST_TYPES,
    OCI_IMAGE_MANIFEST, SOCI_INDEX_CONFIG,
};
use super::platform::Platform;
use super::reference::{ImageDigest, ImageReference};
use crate::store::SociStore;

/// Remote registry operations needed to build and publish an index.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Registry host this client talks to.
    fn registry_url(&self) -> &str;

    /// Check that `repository@digest` resolves to a manifest an index can be
    /// built for.
    ///
    /// Structurally unbuildable inputs are [`SociError::InvalidManifest`];
    /// transport failures are [`SociError::RegistryError`].
    async fn validate_manifest(&self, repository: &str, digest: &ImageDigest) -> Result<()>;

    /// Fetch the image manifest and every blob it references into `store`.
    ///
    /// Returns the descriptor of the image manifest (resolved to the target
    /// platform when the digest names an index).
    async fn pull(
        &self,
        repository: &str,
        digest: &ImageDigest,
        store: &SociStore,
    ) -> Result<Descriptor>;

    /// Upload the artifact identified by `descriptor` from `store` to
    /// `repository`, addressed by its digest.
    async fn push(&self, store: &SociStore, descriptor: &Descriptor, repository: &str)
        -> Result<()>;
}

/// An image manifest fetched from the registry.
struct ResolvedManifest {
    descriptor: Descriptor,
    raw: Vec<u8>,
    manifest: OciImageManifest,
    reference: Reference,
}

/// A manifest document as returned by the registry, before platform resolution.
enum FetchedManifest {
    Image { media_type: String },
    Index(OciImageIndex),
}

/// ECR (or any OCI distribution) registry client.
pub struct EcrRegistry {
    client: Client,
    auth: RegistryAuth,
    registry_url: String,
    platform: Platform,
}

impl EcrRegistry {
    /// Resolve credentials and create a client for `registry_url`.
    pub async fn connect(registry_url: impl Into<String>, region: &str) -> Result<Self> {
        let registry_url = registry_url.into();
        let auth = RegistryAuth::resolve(&registry_url, region).await?;
        Ok(Self::with_auth(registry_url, auth))
    }

    /// Create a client with explicit credentials.
    pub fn with_auth(registry_url: impl Into<String>, auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            auth,
            registry_url: registry_url.into(),
            platform: Platform::default_spec(),
        }
    }

    fn oci_reference(&self, reference: &ImageReference) -> Result<Reference> {
        let ref_str = reference.on_registry(&self.registry_url);
        ref_str.parse::<Reference>().map_err(|e| {
            SociError::InvalidRequest(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }

    fn registry_err(&self, context: &str, e: impl std::fmt::Display) -> SociError {
        SociError::RegistryError {
            registry: self.registry_url.clone(),
            message: format!("{}: {}", context, e),
        }
    }

    async fn fetch_raw(&self, reference: &Reference) -> Result<Vec<u8>> {
        let auth = self.auth.to_oci_auth();
        let (raw, _digest) = self
            .client
            .pull_manifest_raw(reference, &auth, ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| match e {
                OciDistributionError::ImageManifestNotFoundError(msg) => {
                    SociError::InvalidManifest(format!("Manifest not found: {}", msg))
                }
                other => self.registry_err("Failed to pull manifest", other),
            })?;
        Ok(raw)
    }

    /// Fetch `repository@digest`, following an index to this client's platform.
    async fn resolve_manifest(
        &self,
        repository: &str,
        digest: &ImageDigest,
    ) -> Result<ResolvedManifest> {
        let image_ref = ImageReference::new(repository, digest.clone())?;
        let reference = self.oci_reference(&image_ref)?;
        let raw = self.fetch_raw(&reference).await?;

        let (media_type, raw, reference) = match classify_manifest(&raw)? {
            FetchedManifest::Image { media_type } => (media_type, raw, reference),
            FetchedManifest::Index(index) => {
                let entry = index
                    .manifests
                    .iter()
                    .find(|entry| {
                        entry.platform.as_ref().map_or(false, |p| {
                            self.platform
                                .matches(&p.os, &p.architecture, p.variant.as_deref())
                        })
                    })
                    .ok_or_else(|| {
                        SociError::InvalidManifest(format!(
                            "Index {} has no manifest for platform {}",
                            digest, self.platform
                        ))
                    })?;

                tracing::debug!(
                    index = %digest,
                    manifest = %entry.digest,
                    platform = %self.platform,
                    "Resolved image index to platform manifest"
                );

                let platform_digest = ImageDigest::parse(&entry.digest)
                    .map_err(|e| SociError::InvalidManifest(e.to_string()))?;
                let platform_ref =
                    self.oci_reference(&ImageReference::new(repository, platform_digest)?)?;
                let platform_raw = self.fetch_raw(&platform_ref).await?;
                match classify_manifest(&platform_raw)? {
                    FetchedManifest::Image { media_type } => {
                        (media_type, platform_raw, platform_ref)
                    }
                    FetchedManifest::Index(_) => {
                        return Err(SociError::InvalidManifest(format!(
                            "Index {} points at another index",
                            digest
                        )))
                    }
                }
            }
        };

        let manifest: OciImageManifest = serde_json::from_slice(&raw)
            .map_err(|e| SociError::InvalidManifest(format!("Malformed image manifest: {}", e)))?;
        let descriptor = Descriptor::for_bytes(media_type, &raw);

        Ok(ResolvedManifest {
            descriptor,
            raw,
            manifest,
            reference,
        })
    }

    async fn pull_blob_into(
        &self,
        reference: &Reference,
        blob: &OciDescriptor,
        store: &SociStore,
    ) -> Result<()> {
        let descriptor = Descriptor::new(blob.media_type.clone(), blob.digest.clone(), blob.size);
        if store.exists(&descriptor) {
            return Ok(());
        }

        let ingest_path = store.content().ingest_path(&blob.digest)?;
        let mut file = tokio::fs::File::create(&ingest_path).await.map_err(|e| {
            SociError::StorageError(format!(
                "Failed to create {}: {}",
                ingest_path.display(),
                e
            ))
        })?;

        if let Err(e) = self.client.pull_blob(reference, blob, &mut file).await {
            drop(file);
            let _ = tokio::fs::remove_file(&ingest_path).await;
            return Err(self.registry_err(&format!("Failed to pull blob {}", blob.digest), e));
        }
        file.flush().await.map_err(|e| {
            SociError::StorageError(format!(
                "Failed to flush {}: {}",
                ingest_path.display(),
                e
            ))
        })?;
        drop(file);

        store.content().commit(&descriptor)
    }
}

/// Decide whether raw manifest bytes are an image manifest or an index.
fn classify_manifest(raw: &[u8]) -> Result<FetchedManifest> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| SociError::InvalidManifest(format!("Manifest is not JSON: {}", e)))?;
    let media_type = value
        .get("mediaType")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let index = match media_type.as_deref() {
        Some(mt) if is_index(mt) => true,
        Some(mt) if is_image_manifest(mt) => false,
        Some(mt) => {
            return Err(SociError::InvalidManifest(format!(
                "Unsupported manifest media type: {}",
                mt
            )))
        }
        None => value.get("manifests").is_some(),
    };

    if index {
        let index: OciImageIndex = serde_json::from_value(value)
            .map_err(|e| SociError::InvalidManifest(format!("Malformed image index: {}", e)))?;
        Ok(FetchedManifest::Index(index))
    } else {
        Ok(FetchedManifest::Image {
            media_type: media_type.unwrap_or_else(|| OCI_IMAGE_MANIFEST.to_string()),
        })
    }
}

/// Reject manifests an index cannot be built for.
fn check_buildable(manifest: &OciImageManifest) -> Result<()> {
    if manifest.config.media_type == SOCI_INDEX_CONFIG {
        return Err(SociError::InvalidManifest(
            "Manifest is already a SOCI index".to_string(),
        ));
    }
    if manifest.layers.is_empty() {
        return Err(SociError::InvalidManifest(
            "Manifest has no layers".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl RegistryClient for EcrRegistry {
    fn registry_url(&self) -> &str {
        &self.registry_url
    }

    async fn validate_manifest(&self, repository: &str, digest: &ImageDigest) -> Result<()> {
        let resolved = self.resolve_manifest(repository, digest).await?;
        check_buildable(&resolved.manifest)?;

        tracing::debug!(
            registry_url = %self.registry_url,
            repository = %repository,
            digest = %digest,
            manifest = %resolved.descriptor.digest,
            layers = resolved.manifest.layers.len(),
            "Image manifest is valid"
        );
        Ok(())
    }

    async fn pull(
        &self,
        repository: &str,
        digest: &ImageDigest,
        store: &SociStore,
    ) -> Result<Descriptor> {
        tracing::info!(
            registry_url = %self.registry_url,
            repository = %repository,
            digest = %digest,
            "Pulling image from registry"
        );

        let resolved = self.resolve_manifest(repository, digest).await?;

        self.pull_blob_into(&resolved.reference, &resolved.manifest.config, store)
            .await?;
        for layer in &resolved.manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            self.pull_blob_into(&resolved.reference, layer, store).await?;
        }

        store.push(&resolved.descriptor, &resolved.raw)?;
        store.tag(
            &resolved.descriptor,
            &format!("{}@{}", repository, digest),
        )?;

        tracing::info!(
            repository = %repository,
            manifest = %resolved.descriptor.digest,
            layers = resolved.manifest.layers.len(),
            "Image pulled successfully"
        );
        Ok(resolved.descriptor)
    }

    async fn push(
        &self,
        store: &SociStore,
        descriptor: &Descriptor,
        repository: &str,
    ) -> Result<()> {
        let raw = store.fetch(descriptor)?;
        let manifest: OciImageManifest = serde_json::from_slice(&raw)?;

        // The client re-encodes the manifest before upload; the digest we push
        // under must survive that.
        let encoded = Descriptor::for_bytes(descriptor.media_type.clone(), &to_canonical_json(&manifest)?);
        if encoded.digest != descriptor.digest {
            return Err(SociError::StorageError(format!(
                "Manifest {} is not canonically encoded",
                descriptor.digest
            )));
        }

        let config_desc = Descriptor::new(
            manifest.config.media_type.clone(),
            manifest.config.digest.clone(),
            manifest.config.size,
        );
        let config = Config::new(
            store.fetch(&config_desc)?,
            manifest.config.media_type.clone(),
            None,
        );

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            let layer_desc =
                Descriptor::new(layer.media_type.clone(), layer.digest.clone(), layer.size);
            layers.push(ImageLayer::new(
                store.fetch(&layer_desc)?,
                layer.media_type.clone(),
                layer.annotations.clone(),
            ));
        }

        let image_ref = ImageReference::new(repository, ImageDigest::parse(&descriptor.digest)?)?;
        let reference = self.oci_reference(&image_ref)?;

        tracing::info!(
            registry_url = %self.registry_url,
            repository = %repository,
            index_digest = %descriptor.digest,
            layers = layers.len(),
            "Pushing artifact to registry"
        );

        let auth = self.auth.to_oci_auth();
        let response = self
            .client
            .push(&reference, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| self.registry_err("Failed to push artifact", e))?;

        tracing::info!(
            index_digest = %descriptor.digest,
            manifest_url = %response.manifest_url,
            "Artifact pushed successfully"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::descriptor::{DOCKER_MANIFEST_V2, OCI_IMAGE_INDEX, OCI_LAYER_GZIP};

    fn image_manifest(config_type: &str, layers: usize) -> OciImageManifest {
        let layer = serde_json::json!({
            "mediaType": OCI_LAYER_GZIP,
            "digest": format!("sha256:{}", "a".repeat(64)),
            "size": 10
        });
        serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST,
            "config": {
                "mediaType": config_type,
                "digest": format!("sha256:{}", "b".repeat(64)),
                "size": 2
            },
            "layers": vec![layer; layers]
        }))
        .unwrap()
    }

    #[test]
    fn test_classify_image_manifest() {
        let raw = serde_json::to_vec(&image_manifest("application/vnd.oci.image.config.v1+json", 1))
            .unwrap();
        match classify_manifest(&raw).unwrap() {
            FetchedManifest::Image { media_type } => assert_eq!(media_type, OCI_IMAGE_MANIFEST),
            FetchedManifest::Index(_) => panic!("expected image manifest"),
        }
    }

    #[test]
    fn test_classify_docker_manifest() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST_V2,
            "config": {"mediaType": "x", "digest": "sha256:c", "size": 1},
            "layers": []
        }))
        .unwrap();
        assert!(matches!(
            classify_manifest(&raw).unwrap(),
            FetchedManifest::Image { .. }
        ));
    }

    #[test]
    fn test_classify_index() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_INDEX,
            "manifests": [{
                "mediaType": OCI_IMAGE_MANIFEST,
                "digest": format!("sha256:{}", "c".repeat(64)),
                "size": 100,
                "platform": {"os": "linux", "architecture": "amd64"}
            }]
        }))
        .unwrap();
        match classify_manifest(&raw).unwrap() {
            FetchedManifest::Index(index) => assert_eq!(index.manifests.len(), 1),
            FetchedManifest::Image { .. } => panic!("expected index"),
        }
    }

    #[test]
    fn test_classify_rejects_unknown_media_type() {
        let raw = br#"{"schemaVersion":1,"mediaType":"application/vnd.docker.distribution.manifest.v1+json"}"#;
        let err = classify_manifest(raw).err().unwrap();
        assert!(matches!(err, SociError::InvalidManifest(_)));
    }

    #[test]
    fn test_classify_rejects_garbage() {
        let err = classify_manifest(b"<html>").err().unwrap();
        assert!(matches!(err, SociError::InvalidManifest(_)));
    }

    #[test]
    fn test_check_buildable() {
        assert!(check_buildable(&image_manifest("application/vnd.oci.image.config.v1+json", 2)).is_ok());

        let err = check_buildable(&image_manifest(SOCI_INDEX_CONFIG, 1)).unwrap_err();
        assert!(err.to_string().contains("SOCI index"));

        let err = check_buildable(&image_manifest("application/vnd.oci.image.config.v1+json", 0))
            .unwrap_err();
        assert!(matches!(err, SociError::InvalidManifest(_)));
    }

    #[test]
    fn test_oci_reference_by_digest() {
        let registry = EcrRegistry::with_auth(
            "123456789012.dkr.ecr.us-west-2.amazonaws.com",
            RegistryAuth::anonymous(),
        );
        let digest = ImageDigest::parse(&format!("sha256:{}", "d".repeat(64))).unwrap();
        let reference = registry
            .oci_reference(&ImageReference::new("team/app", digest).unwrap())
            .unwrap();

        assert_eq!(reference.registry(), "123456789012.dkr.ecr.us-west-2.amazonaws.com");
        assert_eq!(reference.repository(), "team/app");
        assert_eq!(reference.digest(), Some(format!("sha256:{}", "d".repeat(64)).as_str()));
        assert_eq!(registry.registry_url(), "123456789012.dkr.ecr.us-west-2.amazonaws.com");
    }
}
