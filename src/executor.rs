use crate::builder::{ArtifactBuilder, PreparedBuild};
use crate::catalog::{Question, QuestionCatalog};
use crate::cleanup::CleanupGuard;
use crate::error::SandboxError;
use crate::model::{
    ExecutionMode, ExecutionOutcome, InstanceSpec, Language, PrivilegeConstraints,
    ResourceLimits, Submission,
};
use crate::sandbox::{self, ExecutionBackend};
use crate::watcher::{await_terminal, WatchPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Raw request as it arrives at the boundary, before the language is resolved
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub source: String,
    pub language: String,
    pub question_code: i64,
    pub arguments: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub limits: ResourceLimits,
    pub privileges: PrivilegeConstraints,
    pub watch: WatchPolicy,
    pub build_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            privileges: PrivilegeConstraints::default(),
            watch: WatchPolicy::default(),
            build_timeout: Duration::from_secs(120),
        }
    }
}

/// The execution pipeline: build, launch, watch, fetch, with cleanup around it all.
/// One run per request, stages strictly in sequence, single attempt.
pub struct Executor {
    catalog: Arc<dyn QuestionCatalog>,
    builder: ArtifactBuilder,
    backend: Arc<dyn ExecutionBackend>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        catalog: Arc<dyn QuestionCatalog>,
        builder: ArtifactBuilder,
        backend: Arc<dyn ExecutionBackend>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            catalog,
            builder,
            backend,
            settings,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.backend.mode()
    }

    pub fn catalog(&self) -> Arc<dyn QuestionCatalog> {
        self.catalog.clone()
    }

    /// Resolve the request against the catalog and run it
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionOutcome, SandboxError> {
        let language: Language = request.language.parse()?;
        if request.source.trim().is_empty() {
            return Err(SandboxError::InvalidSubmission(
                "source code cannot be empty".to_string(),
            ));
        }
        let submission = Submission {
            source: request.source,
            language,
            question_code: request.question_code,
            arguments: request.arguments,
        };
        let question = self.catalog.get(submission.question_code).await?;
        self.run(&submission, &question).await
    }

    #[tracing::instrument(
        name = "pipeline",
        skip_all,
        fields(language = %submission.language, question = submission.question_code, mode = %self.mode())
    )]
    pub async fn run(
        &self,
        submission: &Submission,
        question: &Question,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let prepared = self.builder.prepare(submission, question)?;

        let mut guard = CleanupGuard::new(self.backend.clone(), self.builder.images());
        let result = self.run_guarded(&mut guard, &prepared, submission).await;
        for failure in guard.release().await {
            warn!(error = %failure, "cleanup failed");
        }

        match &result {
            Ok(outcome) => info!(phase = ?outcome.phase, bytes = outcome.output.len(), "run finished"),
            Err(e) => warn!(error = %e, "run failed"),
        }
        result
    }

    async fn run_guarded(
        &self,
        guard: &mut CleanupGuard,
        prepared: &PreparedBuild,
        submission: &Submission,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let tag = self.builder.next_tag(submission.language);
        guard.track_artifact(tag.clone());
        let artifact = tokio::time::timeout(
            self.settings.build_timeout,
            self.builder.build(prepared, &tag),
        )
        .await
        .map_err(|_| {
            SandboxError::build_failed(format!(
                "build did not finish within {}s",
                self.settings.build_timeout.as_secs()
            ))
        })??;

        let payload = serde_json::to_string(&submission.arguments)
            .map_err(|e| SandboxError::InvalidSubmission(e.to_string()))?;
        let spec = InstanceSpec {
            name: sandbox::instance_name(),
            image: artifact.image,
            payload,
            limits: self.settings.limits,
            privileges: self.settings.privileges,
        };

        guard.track_instance(spec.name.clone());
        self.backend.create_instance(&spec).await?;

        let report = await_terminal(self.backend.as_ref(), &spec.name, self.settings.watch).await?;
        let output = self.backend.fetch_output(&spec.name).await?;

        Ok(ExecutionOutcome {
            phase: report.phase,
            reason: report.reason,
            output,
            mode: self.backend.mode(),
        })
    }
}
