/// sandexec error types and the mapping onto the request boundary
use std::time::Duration;

/// Main error type for a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Language tag outside the supported set
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
    /// Referenced question code does not exist in the catalog
    #[error("question {0} not found")]
    QuestionNotFound(i64),
    /// Malformed submission (empty source, bad request body)
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
    /// Build step failed; carries the build tool's diagnostics
    #[error("artifact build failed:\n{diagnostics}")]
    ArtifactBuildFailed { diagnostics: String },
    /// Backend refused to create the execution instance
    #[error("failed to launch execution instance: {0}")]
    LaunchFailed(String),
    /// Instance did not reach a terminal phase before the deadline
    #[error("execution did not finish within {}s", deadline.as_secs_f64())]
    Timeout { deadline: Duration },
    /// Backend or transport fault while observing the instance
    #[error("failed to retrieve {stage} of execution instance: {message}")]
    RetrievalError { stage: &'static str, message: String },
    /// Deleting an ephemeral resource failed. Logged, never returned to callers.
    #[error("cleanup of {resource} failed: {message}")]
    CleanupFailed { resource: String, message: String },
    /// Question store failure
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl SandboxError {
    pub fn build_failed(diagnostics: impl Into<String>) -> Self {
        SandboxError::ArtifactBuildFailed {
            diagnostics: diagnostics.into(),
        }
    }

    pub fn retrieval(stage: &'static str, err: impl std::fmt::Display) -> Self {
        SandboxError::RetrievalError {
            stage,
            message: err.to_string(),
        }
    }

    pub fn cleanup(resource: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SandboxError::CleanupFailed {
            resource: resource.into(),
            message: err.to_string(),
        }
    }
}

/// Stable machine-readable name of the error kind
pub fn kind(err: &SandboxError) -> &'static str {
    match err {
        SandboxError::UnsupportedLanguage(_) => "UnsupportedLanguage",
        SandboxError::QuestionNotFound(_) => "QuestionNotFound",
        SandboxError::InvalidSubmission(_) => "InvalidSubmission",
        SandboxError::ArtifactBuildFailed { .. } => "ArtifactBuildFailed",
        SandboxError::LaunchFailed(_) => "LaunchFailed",
        SandboxError::Timeout { .. } => "TimeoutError",
        SandboxError::RetrievalError { .. } => "RetrievalError",
        SandboxError::CleanupFailed { .. } => "CleanupFailed",
        SandboxError::Catalog(_) => "CatalogError",
    }
}

/// HTTP status the request boundary reports for an error
pub fn status_code(err: &SandboxError) -> u16 {
    match err {
        SandboxError::UnsupportedLanguage(_) => 400,
        SandboxError::InvalidSubmission(_) => 400,
        SandboxError::QuestionNotFound(_) => 404,
        SandboxError::Timeout { .. } => 504,
        SandboxError::ArtifactBuildFailed { .. }
        | SandboxError::LaunchFailed(_)
        | SandboxError::RetrievalError { .. }
        | SandboxError::CleanupFailed { .. }
        | SandboxError::Catalog(_) => 500,
    }
}

/// Errors from the question store
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("question {0} not found")]
    NotFound(i64),
    #[error("question {0} already exists")]
    Conflict(i64),
    #[error("invalid question: {0}")]
    Invalid(String),
    #[error("storage error in {operation}: {reason}")]
    Storage { operation: String, reason: String },
}

impl CatalogError {
    pub fn storage(operation: &str, err: impl std::fmt::Display) -> Self {
        CatalogError::Storage {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<CatalogError> for SandboxError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(code) => SandboxError::QuestionNotFound(code),
            other => SandboxError::Catalog(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failure_keeps_diagnostics() {
        let err = SandboxError::build_failed("solution.py:3: SyntaxError: invalid syntax");
        let msg = err.to_string();
        assert!(msg.contains("SyntaxError"));
        assert_eq!(kind(&err), "ArtifactBuildFailed");
        assert_eq!(status_code(&err), 500);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_code(&SandboxError::UnsupportedLanguage("ruby".into())), 400);
        assert_eq!(status_code(&SandboxError::QuestionNotFound(7)), 404);
        assert_eq!(
            status_code(&SandboxError::Timeout {
                deadline: Duration::from_secs(3)
            }),
            504
        );
        assert_eq!(status_code(&SandboxError::LaunchFailed("quota".into())), 500);
        assert_eq!(status_code(&SandboxError::retrieval("output", "eof")), 500);
    }

    #[test]
    fn test_catalog_not_found_becomes_question_not_found() {
        let err: SandboxError = CatalogError::NotFound(42).into();
        assert!(matches!(err, SandboxError::QuestionNotFound(42)));

        let err: SandboxError = CatalogError::storage("get", "disk full").into();
        assert_eq!(kind(&err), "CatalogError");
    }

    #[test]
    fn test_timeout_display() {
        let err = SandboxError::Timeout {
            deadline: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "execution did not finish within 1.5s");
    }
}
