//! Cleanup Coordinator.
//!
//! A `CleanupGuard` owns every ephemeral resource of one pipeline run. Each resource
//! is released at most once: `release` for the normal and error paths, `Drop` when the
//! run is cancelled before reaching `release`. Release failures are reported back to
//! the caller for logging and never replace the run's own result.

use crate::builder::ImageBuilder;
use crate::error::SandboxError;
use crate::sandbox::ExecutionBackend;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct CleanupGuard {
    backend: Arc<dyn ExecutionBackend>,
    images: Arc<dyn ImageBuilder>,
    instance: Option<String>,
    artifact: Option<String>,
}

impl CleanupGuard {
    pub fn new(backend: Arc<dyn ExecutionBackend>, images: Arc<dyn ImageBuilder>) -> Self {
        Self {
            backend,
            images,
            instance: None,
            artifact: None,
        }
    }

    /// Track an image tag. Tracked before the build starts, so removal must tolerate absence.
    pub fn track_artifact(&mut self, tag: impl Into<String>) {
        self.artifact = Some(tag.into());
    }

    /// Track an instance name before `create_instance` is attempted
    pub fn track_instance(&mut self, name: impl Into<String>) {
        self.instance = Some(name.into());
    }

    pub fn is_armed(&self) -> bool {
        self.instance.is_some() || self.artifact.is_some()
    }

    /// Delete everything tracked, returning the secondary failures.
    ///
    /// Deletion runs on its own task: dropping the caller mid-release does not abort it.
    pub async fn release(mut self) -> Vec<SandboxError> {
        let instance = self.instance.take();
        let artifact = self.artifact.take();
        if instance.is_none() && artifact.is_none() {
            return Vec::new();
        }

        let backend = self.backend.clone();
        let images = self.images.clone();
        let task = tokio::spawn(async move {
            release_all(backend.as_ref(), images.as_ref(), instance, artifact).await
        });
        match task.await {
            Ok(failures) => failures,
            Err(e) => vec![SandboxError::cleanup("release task", e)],
        }
    }
}

async fn release_all(
    backend: &dyn ExecutionBackend,
    images: &dyn ImageBuilder,
    instance: Option<String>,
    artifact: Option<String>,
) -> Vec<SandboxError> {
    let mut failures = Vec::new();
    // Instance first: the image cannot be removed while a container still uses it
    if let Some(name) = instance {
        match backend.delete_instance(&name).await {
            Ok(()) => debug!(%name, "instance released"),
            Err(e) => failures.push(e),
        }
    }
    if let Some(tag) = artifact {
        match images.remove_image(&tag).await {
            Ok(()) => debug!(%tag, "artifact released"),
            Err(e) => failures.push(e),
        }
    }
    failures
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let instance = self.instance.take();
        let artifact = self.artifact.take();
        if instance.is_none() && artifact.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(?instance, ?artifact, "run abandoned, releasing resources in background");
                let backend = self.backend.clone();
                let images = self.images.clone();
                handle.spawn(async move {
                    for failure in
                        release_all(backend.as_ref(), images.as_ref(), instance, artifact).await
                    {
                        warn!(error = %failure, "cleanup failed");
                    }
                });
            }
            Err(_) => {
                error!(?instance, ?artifact, "no runtime available, resources leaked");
            }
        }
    }
}
