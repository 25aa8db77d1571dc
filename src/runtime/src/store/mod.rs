//! Storage handles provisioned inside a scratch workspace.
//!
//! ```text
//! <workspace>/
//! ├── store/          content store + OCI layout (shared blobs)
//! │   ├── oci-layout
//! │   ├── index.json
//! │   ├── labels.json
//! │   └── blobs/sha256/
//! └── artifacts.db    index artifacts metadata
//! ```
//!
//! None of the initializers retries; retry policy belongs to whoever
//! invokes the process.

mod artifacts_db;
mod content;
mod layout;
mod soci_store;

pub use artifacts_db::{ArtifactEntry, ArtifactsDb};
pub use content::ContentStore;
pub use layout::OciLayoutStore;
pub use soci_store::{SociStore, LABEL_GC_REF_CONTENT, LABEL_GC_ROOT};

use soci_wrapper_core::error::Result;

use crate::workspace::ScratchWorkspace;

/// Directory (relative to the workspace) holding blobs and the OCI layout.
pub const ARTIFACTS_STORE_NAME: &str = "store";

/// File (relative to the workspace) holding the metadata database.
pub const ARTIFACTS_DB_NAME: &str = "artifacts.db";

/// Open the content store at `<workspace>/store`.
pub fn init_content_store(workspace: &ScratchWorkspace) -> Result<ContentStore> {
    ContentStore::open(&workspace.path().join(ARTIFACTS_STORE_NAME))
}

/// Open the OCI layout at `<workspace>/store` wrapped in the GC-aware adapter.
pub fn init_artifact_store(workspace: &ScratchWorkspace) -> Result<SociStore> {
    let layout = OciLayoutStore::open(&workspace.path().join(ARTIFACTS_STORE_NAME))?;
    SociStore::new(layout)
}

/// Open (creating if absent) the metadata database at `<workspace>/artifacts.db`.
pub fn init_artifacts_db(workspace: &ScratchWorkspace) -> Result<ArtifactsDb> {
    ArtifactsDb::open(&workspace.path().join(ARTIFACTS_DB_NAME))
}

/// The three storage handles one invocation works with.
pub struct Storage {
    pub content: ContentStore,
    pub artifacts: SociStore,
    pub db: ArtifactsDb,
}

/// Opens the storage handles inside a freshly provisioned workspace.
pub trait StorageProvisioner: Send + Sync {
    fn provision(&self, workspace: &ScratchWorkspace) -> Result<Storage>;
}

/// Production [`StorageProvisioner`]: content store, artifact store and
/// database, in that order, all rooted in the workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceStorage;

impl StorageProvisioner for WorkspaceStorage {
    fn provision(&self, workspace: &ScratchWorkspace) -> Result<Storage> {
        let content = init_content_store(workspace)?;
        let artifacts = init_artifact_store(workspace)?;
        let db = init_artifacts_db(workspace)?;
        Ok(Storage {
            content,
            artifacts,
            db,
        })
    }
}
