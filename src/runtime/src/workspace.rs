//! Per-invocation scratch workspace.
//!
//! Each invocation owns one uniquely named directory under the scratch root
//! (`/tmp` by default). The directory is removed by [`ScratchWorkspace::teardown`]
//! or, failing that, when the workspace is dropped.

use std::path::{Path, PathBuf};

use soci_wrapper_core::error::{Result, SociError};
use sysinfo::Disks;
use tempfile::TempDir;

/// An exclusively owned, ephemeral working directory.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchWorkspace {
    /// Create a new uniquely named directory under `parent`.
    ///
    /// The name starts with `prefix` followed by random characters, so
    /// concurrent invocations sharing `parent` never collide.
    pub fn provision(parent: &Path, prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| SociError::ResourceError {
                path: parent.display().to_string(),
                message: format!("Failed to create scratch workspace: {}", e),
            })?;
        let path = dir.path().to_path_buf();

        tracing::debug!(path = %path.display(), "Provisioned scratch workspace");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Root of the workspace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether teardown has not run yet.
    pub fn is_active(&self) -> bool {
        self.dir.is_some()
    }

    /// Recursively remove the workspace.
    ///
    /// Safe to call more than once and on a directory someone else already
    /// removed. Failures are logged, never returned.
    pub fn teardown(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed scratch workspace");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Scratch workspace already removed");
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Clean up error"
                );
            }
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Free bytes on the filesystem holding `path`, if it can be determined.
///
/// Informational only; nothing enforces a threshold on it.
pub fn available_space(path: &Path) -> Option<u64> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_creates_directory() {
        let parent = TempDir::new().unwrap();
        let ws = ScratchWorkspace::provision(parent.path(), "req-1-").unwrap();

        assert!(ws.path().is_dir());
        assert!(ws.path().starts_with(parent.path()));
        let name = ws.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("req-1-"));
        assert!(ws.is_active());
    }

    #[test]
    fn test_provision_names_are_unique() {
        let parent = TempDir::new().unwrap();
        let a = ScratchWorkspace::provision(parent.path(), "same-").unwrap();
        let b = ScratchWorkspace::provision(parent.path(), "same-").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_provision_missing_parent() {
        let parent = TempDir::new().unwrap();
        let missing = parent.path().join("does-not-exist");
        let err = ScratchWorkspace::provision(&missing, "x-").unwrap_err();
        assert!(matches!(err, SociError::ResourceError { .. }));
    }

    #[test]
    fn test_teardown_removes_contents() {
        let parent = TempDir::new().unwrap();
        let mut ws = ScratchWorkspace::provision(parent.path(), "x-").unwrap();
        std::fs::create_dir_all(ws.path().join("store/blobs/sha256")).unwrap();
        std::fs::write(ws.path().join("artifacts.db"), b"db").unwrap();
        let path = ws.path().to_path_buf();

        ws.teardown();
        assert!(!path.exists());
        assert!(!ws.is_active());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let parent = TempDir::new().unwrap();
        let mut ws = ScratchWorkspace::provision(parent.path(), "x-").unwrap();
        ws.teardown();
        ws.teardown();
        assert!(!ws.path().exists());
    }

    #[test]
    fn test_teardown_after_external_removal() {
        let parent = TempDir::new().unwrap();
        let mut ws = ScratchWorkspace::provision(parent.path(), "x-").unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();
        ws.teardown();
        assert!(!ws.is_active());
    }

    #[test]
    fn test_drop_removes_directory() {
        let parent = TempDir::new().unwrap();
        let path = {
            let ws = ScratchWorkspace::provision(parent.path(), "x-").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_available_space_does_not_panic() {
        let parent = TempDir::new().unwrap();
        let _ = available_space(parent.path());
        let _ = available_space(Path::new("/nonexistent/soci-wrapper"));
    }
}
