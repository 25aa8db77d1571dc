//! SOCI Wrapper Runtime - builds a SOCI index for one image and publishes it.
//!
//! This crate provides the pipeline and its collaborators: the scratch
//! workspace, the on-disk stores, the registry client and the index builder.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod pipeline;
pub mod request;
pub mod soci;
pub mod store;
pub mod workspace;

// Re-export common types
pub use oci::{
    build_ecr_registry_url, Descriptor, EcrRegistry, Image, ImageDigest, ImageReference,
    Platform, RegistryAuth, RegistryClient,
};
pub use pipeline::{Failure, Outcome, Pipeline, Stage};
pub use request::InvocationRequest;
pub use soci::{select_latest, BuildOptions, IndexBuilder, IndexDescriptorInfo, SociIndexBuilder};
pub use store::{
    ArtifactEntry, ArtifactsDb, ContentStore, OciLayoutStore, SociStore, Storage,
    StorageProvisioner, WorkspaceStorage,
};
pub use workspace::{available_space, ScratchWorkspace};

/// SOCI wrapper runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
