//! Build-and-publish pipeline.
//!
//! ```text
//! Start ──validate──► Validated ──provision──► WorkspaceReady ──init──► StorageReady
//!   │                                                                       │
//!   └─► SkippedEarly                                                       pull
//!                                                                           ▼
//! Done ◄── Published ◄──push── Selected ◄──select── Indexed ◄──build──── Pulled
//! ```
//!
//! Any stage may fail, which ends the run in `Failed`. Once the workspace is
//! provisioned it is torn down before `run` returns, whatever the outcome.

use std::future::Future;
use std::path::PathBuf;

use soci_wrapper_core::error::{Result, SociError};
use soci_wrapper_core::LogContext;
use tokio::sync::watch;

use crate::oci::{Descriptor, Image, RegistryClient};
use crate::request::InvocationRequest;
use crate::soci::{select_latest, BuildOptions, IndexBuilder};
use crate::store::{Storage, StorageProvisioner, WorkspaceStorage};
use crate::workspace::{available_space, ScratchWorkspace};

pub const MSG_PUBLISHED: &str = "Successfully built and pushed SOCI index";
pub const MSG_SKIPPED: &str = "Exited early due to manifest validation error";
pub const MSG_VALIDATION_ERROR: &str = "Image manifest validation error";
pub const MSG_DIRECTORY_ERROR: &str = "Directory create error";
pub const MSG_STORAGE_INIT_ERROR: &str = "OCI storage initialization error";
pub const MSG_PULL_ERROR: &str = "Image pull error";
pub const MSG_BUILD_ERROR: &str = "SOCI index build error";
pub const MSG_PUSH_ERROR: &str = "SOCI index push error";

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Validated,
    WorkspaceReady,
    StorageReady,
    Pulled,
    Indexed,
    Selected,
    Published,
    Done,
    SkippedEarly,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Validated => "validated",
            Stage::WorkspaceReady => "workspace-ready",
            Stage::StorageReady => "storage-ready",
            Stage::Pulled => "pulled",
            Stage::Indexed => "indexed",
            Stage::Selected => "selected",
            Stage::Published => "published",
            Stage::Done => "done",
            Stage::SkippedEarly => "skipped-early",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The index was built and pushed.
    Published { index: Descriptor },
    /// Manifest validation failed; nothing was done.
    Skipped { reason: String },
}

impl Outcome {
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Published { .. } => MSG_PUBLISHED,
            Outcome::Skipped { .. } => MSG_SKIPPED,
        }
    }

    /// Terminal state of the run.
    pub fn final_stage(&self) -> Stage {
        match self {
            Outcome::Published { .. } => Stage::Done,
            Outcome::Skipped { .. } => Stage::SkippedEarly,
        }
    }
}

/// A failed run.
#[derive(Debug)]
pub struct Failure {
    /// Last state reached before the failing step
    pub stage: Stage,
    pub message: &'static str,
    pub error: SociError,
}

impl Failure {
    /// Terminal state of the run; `stage` keeps where it stopped.
    pub fn final_stage(&self) -> Stage {
        Stage::Failed
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.message, self.error)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Log a failure with the invocation context and wrap it.
fn fail(ctx: &LogContext, stage: Stage, message: &'static str, error: SociError) -> Failure {
    ctx.error(message, &error);
    Failure {
        stage,
        message,
        error,
    }
}

/// Resolve once the shutdown flag is raised. Never resolves if the sender is
/// gone without raising it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run `fut` unless shutdown is requested first.
async fn cancellable<T, F>(
    activity: &str,
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => Err(SociError::Cancelled(activity.to_string())),
        result = fut => result,
    }
}

/// Sequences one invocation over a registry client, an index builder and
/// the workspace storage.
pub struct Pipeline<R, B, S = WorkspaceStorage> {
    registry: R,
    builder: B,
    storage: S,
    scratch_root: PathBuf,
    options: BuildOptions,
}

impl<R: RegistryClient, B: IndexBuilder> Pipeline<R, B> {
    pub fn new(registry: R, builder: B, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            builder,
            storage: WorkspaceStorage,
            scratch_root: scratch_root.into(),
            options: BuildOptions::default(),
        }
    }
}

impl<R: RegistryClient, B: IndexBuilder, S: StorageProvisioner> Pipeline<R, B, S> {
    /// Replace how storage handles are opened in the workspace.
    pub fn with_storage<T: StorageProvisioner>(self, storage: T) -> Pipeline<R, B, T> {
        Pipeline {
            registry: self.registry,
            builder: self.builder,
            storage,
            scratch_root: self.scratch_root,
            options: self.options,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Run the pipeline with a fresh logging context.
    pub async fn run(
        &self,
        request: &InvocationRequest,
        shutdown: watch::Receiver<bool>,
    ) -> std::result::Result<Outcome, Failure> {
        let ctx = LogContext::new(&request.repository, request.digest.as_str())
            .with_registry_url(self.registry.registry_url());
        self.run_with_context(ctx, request, shutdown).await
    }

    /// Run the pipeline, logging under `ctx`.
    pub async fn run_with_context(
        &self,
        mut ctx: LogContext,
        request: &InvocationRequest,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::result::Result<Outcome, Failure> {
        // Start -> Validated
        let validated = cancellable(
            "manifest validation",
            &mut shutdown,
            self.registry
                .validate_manifest(&request.repository, &request.digest),
        )
        .await;
        match validated {
            Ok(()) => {}
            Err(e @ SociError::Cancelled(_)) => {
                return Err(fail(&ctx, Stage::Start, MSG_VALIDATION_ERROR, e))
            }
            Err(e) => {
                ctx.warn(&format!(
                    "{} ({:?}): {}",
                    MSG_VALIDATION_ERROR,
                    e.class(),
                    e
                ));
                return Ok(Outcome::Skipped {
                    reason: e.to_string(),
                });
            }
        }

        // Validated -> WorkspaceReady
        match available_space(&self.scratch_root) {
            Some(bytes) => ctx.info(&format!(
                "There are {} bytes of free space in {}",
                bytes,
                self.scratch_root.display()
            )),
            None => ctx.warn(&format!(
                "Could not determine free space in {}",
                self.scratch_root.display()
            )),
        }
        ctx.info("Creating a directory to store images and SOCI artifacts");
        let prefix = format!("{}-", ctx.invocation_id);
        let mut workspace = ScratchWorkspace::provision(&self.scratch_root, &prefix)
            .map_err(|e| fail(&ctx, Stage::Validated, MSG_DIRECTORY_ERROR, e))?;
        ctx.info(&format!(
            "The path to the data directory: {}",
            workspace.path().display()
        ));

        let result = self
            .run_in_workspace(&mut ctx, request, &workspace, &mut shutdown)
            .await;

        ctx.info(&format!("Removing all files in {}", workspace.path().display()));
        workspace.teardown();

        let index = result?;
        ctx.info(MSG_PUBLISHED);
        Ok(Outcome::Published { index })
    }

    /// Stages that need the workspace. Storage handles are dropped before
    /// this returns.
    async fn run_in_workspace(
        &self,
        ctx: &mut LogContext,
        request: &InvocationRequest,
        workspace: &ScratchWorkspace,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<Descriptor, Failure> {
        // WorkspaceReady -> StorageReady
        let Storage {
            content,
            artifacts,
            db,
        } = self
            .storage
            .provision(workspace)
            .map_err(|e| fail(ctx, Stage::WorkspaceReady, MSG_STORAGE_INIT_ERROR, e))?;

        // StorageReady -> Pulled
        let target = cancellable(
            "image pull",
            shutdown,
            self.registry
                .pull(&request.repository, &request.digest, &artifacts),
        )
        .await
        .map_err(|e| fail(ctx, Stage::StorageReady, MSG_PULL_ERROR, e))?;
        let image = Image {
            name: request.image_reference().name(),
            target,
        };

        // Pulled -> Indexed
        ctx.info("Building SOCI index");
        cancellable(
            "index build",
            shutdown,
            self.builder
                .build(&image, &content, &artifacts, &db, &self.options),
        )
        .await
        .map_err(|e| fail(ctx, Stage::Pulled, MSG_BUILD_ERROR, e))?;

        // Indexed -> Selected
        let selected = self
            .builder
            .list_descriptors(&content, &db, &image, std::slice::from_ref(&self.options.platform))
            .and_then(select_latest)
            .map_err(|e| fail(ctx, Stage::Indexed, MSG_BUILD_ERROR, e))?;
        ctx.set_index_digest(selected.descriptor.digest.clone());

        // Selected -> Published
        cancellable(
            "index push",
            shutdown,
            self.registry
                .push(&artifacts, &selected.descriptor, &request.repository),
        )
        .await
        .map_err(|e| fail(ctx, Stage::Selected, MSG_PUSH_ERROR, e))?;

        Ok(selected.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let (_tx, mut rx) = watch::channel(false);
        let value = cancellable("work", &mut rx, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancellable_already_raised() {
        let (_tx, mut rx) = watch::channel(true);
        let err = cancellable("work", &mut rx, async { Ok(7) }).await.unwrap_err();
        assert!(matches!(err, SociError::Cancelled(ref s) if s == "work"));
    }

    #[tokio::test]
    async fn test_cancellable_raised_while_pending() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let err = cancellable("pull", &mut rx, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cancelled during pull");
    }

    #[tokio::test]
    async fn test_cancellable_dropped_sender_never_cancels() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let value = cancellable("work", &mut rx, async { Ok("done") }).await.unwrap();
        assert_eq!(value, "done");
    }

    #[test]
    fn test_outcome_messages() {
        let skipped = Outcome::Skipped {
            reason: "no layers".to_string(),
        };
        assert_eq!(skipped.message(), "Exited early due to manifest validation error");
        assert_eq!(skipped.final_stage(), Stage::SkippedEarly);

        let published = Outcome::Published {
            index: Descriptor::new("m", "sha256:x", 1),
        };
        assert_eq!(published.message(), "Successfully built and pushed SOCI index");
        assert_eq!(published.final_stage(), Stage::Done);
    }

    #[test]
    fn test_failure_display_and_class() {
        let failure = Failure {
            stage: Stage::StorageReady,
            message: MSG_PULL_ERROR,
            error: SociError::RegistryError {
                registry: "r".to_string(),
                message: "timeout".to_string(),
            },
        };
        assert_eq!(failure.to_string(), "Image pull error: Registry error: r - timeout");
        assert!(failure.is_retryable());
        assert_eq!(failure.stage, Stage::StorageReady);
        assert_eq!(failure.final_stage(), Stage::Failed);
    }
}
