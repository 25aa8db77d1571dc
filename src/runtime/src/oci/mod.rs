//! OCI types and the remote registry client.
//!
//! - [`reference`]: image digests and `repository@digest` references
//! - [`descriptor`]: content descriptors and media types
//! - [`platform`]: target platform for index resolution and builds
//! - [`registry`]: validate / pull / push against a registry
//! - [`credentials`] and [`ecr`]: registry authentication

pub mod credentials;
pub mod descriptor;
pub mod ecr;
pub mod platform;
pub mod reference;
pub mod registry;

pub use credentials::RegistryAuth;
pub use descriptor::{Descriptor, Image};
pub use ecr::build_ecr_registry_url;
pub use platform::Platform;
pub use reference::{ImageDigest, ImageReference};
pub use registry::{EcrRegistry, RegistryClient};
