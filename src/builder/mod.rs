//! Artifact Builder: turns a submission into a runnable image.
//!
//! Building happens in two steps. `prepare` is pure: it resolves the entry point and
//! parameter types from the question, checks the submitted arguments against them and
//! assembles the harness and descriptor. `build` then writes that context into a fresh
//! working directory, hands it to the build backend and removes the directory again
//! whatever the outcome.

use crate::catalog::{is_identifier, Question};
use crate::error::SandboxError;
use crate::model::{Artifact, Language, Submission};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub mod harness;

pub use harness::{BaseImages, BuildContext, ARGS_ENV};

/// External image-build capability
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `context` (a directory holding a `Dockerfile`) and tag the result.
    /// Fails with `ArtifactBuildFailed` carrying the tool's diagnostics.
    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), SandboxError>;

    /// Remove a tagged image. Removing an image that does not exist is not an error.
    async fn remove_image(&self, tag: &str) -> Result<(), SandboxError>;
}

/// A validated build context for one submission
#[derive(Debug, Clone)]
pub struct PreparedBuild {
    pub language: Language,
    pub context: BuildContext,
}

pub struct ArtifactBuilder {
    images: Arc<dyn ImageBuilder>,
    base: BaseImages,
    registry: Option<String>,
    run_as_user: i64,
}

impl ArtifactBuilder {
    pub fn new(
        images: Arc<dyn ImageBuilder>,
        base: BaseImages,
        registry: Option<String>,
        run_as_user: i64,
    ) -> Self {
        Self {
            images,
            base,
            registry,
            run_as_user,
        }
    }

    pub fn images(&self) -> Arc<dyn ImageBuilder> {
        self.images.clone()
    }

    /// Fresh, never reused image tag
    pub fn next_tag(&self, language: Language) -> String {
        let suffix = hex::encode(rand::random::<[u8; 8]>());
        match &self.registry {
            Some(registry) => format!(
                "{}/sandexec-{}:{}",
                registry.trim_end_matches('/'),
                language,
                suffix
            ),
            None => format!("sandexec-{}:{}", language, suffix),
        }
    }

    pub fn prepare(
        &self,
        submission: &Submission,
        question: &Question,
    ) -> Result<PreparedBuild, SandboxError> {
        if !is_identifier(&question.entry_point) {
            return Err(SandboxError::build_failed(format!(
                "entry point '{}' is not a valid identifier",
                question.entry_point
            )));
        }
        let params = question.ordered_parameters();
        harness::check_arguments(&params, &submission.arguments)
            .map_err(SandboxError::build_failed)?;

        let context = harness::assemble(
            submission.language,
            &submission.source,
            &question.entry_point,
            &params,
            &self.base,
            self.run_as_user,
        );
        Ok(PreparedBuild {
            language: submission.language,
            context,
        })
    }

    pub async fn build(&self, prepared: &PreparedBuild, tag: &str) -> Result<Artifact, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("sandexec-build-")
            .tempdir()
            .map_err(|e| {
                SandboxError::build_failed(format!("cannot create working directory: {}", e))
            })?;

        let result = match write_context(workdir.path(), &prepared.context).await {
            Ok(()) => self.images.build_image(workdir.path(), tag).await,
            Err(e) => Err(SandboxError::build_failed(format!(
                "cannot write build context: {}",
                e
            ))),
        };

        if let Err(e) = workdir.close() {
            warn!(error = %SandboxError::cleanup("build working directory", e), "cleanup failed");
        }

        result?;
        info!(%tag, language = %prepared.language, "artifact ready");
        Ok(Artifact {
            image: tag.to_string(),
            language: prepared.language,
            built_at: chrono::Utc::now(),
        })
    }
}

async fn write_context(dir: &Path, context: &BuildContext) -> std::io::Result<()> {
    for (name, content) in &context.files {
        tokio::fs::write(dir.join(name), content).await?;
    }
    let descriptor = crate::docker::render(&context.descriptor);
    tokio::fs::write(dir.join("Dockerfile"), descriptor).await
}
