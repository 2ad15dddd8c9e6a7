use crate::error::SandboxError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "go" => Ok(Language::Go),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// One caller-provided request to execute code. Immutable once received.
#[derive(Debug, Clone)]
pub struct Submission {
    pub source: String,
    pub language: Language,
    pub question_code: i64,
    pub arguments: Vec<serde_json::Value>,
}

/// A built, runnable image of user code plus harness
#[derive(Debug, Clone)]
pub struct Artifact {
    pub image: String,
    pub language: Language,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_millis: u32,
    pub memory_mib: u64,
    /// Only enforced by the local runtime
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 500,
            memory_mib: 128,
            pids_limit: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeConstraints {
    pub run_as_user: i64,
    pub run_as_non_root: bool,
    pub allow_privilege_escalation: bool,
}

impl Default for PrivilegeConstraints {
    fn default() -> Self {
        Self {
            run_as_user: 1000,
            run_as_non_root: true,
            allow_privilege_escalation: false,
        }
    }
}

/// Everything a backend needs to create one execution instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    /// JSON-encoded argument list handed to the harness
    pub payload: String,
    pub limits: ResourceLimits,
    pub privileges: PrivilegeConstraints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

/// A phase observation plus whatever reason the runtime attached to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub reason: Option<String>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            reason: None,
        }
    }

    pub fn with_reason(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Cluster,
    Local,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Cluster => f.write_str("cluster"),
            ExecutionMode::Local => f.write_str("local"),
        }
    }
}

/// Result of a pipeline run that reached a terminal phase
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub phase: Phase,
    pub reason: Option<String>,
    pub output: Vec<u8>,
    pub mode: ExecutionMode,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == Phase::Succeeded
    }

    /// Captured output as text with trailing line endings removed
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output)
            .trim_end_matches(['\n', '\r'])
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!(" Go ".parse::<Language>().unwrap(), Language::Go);
        let err = "ruby".parse::<Language>().unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedLanguage(ref l) if l == "ruby"));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!Phase::Pending.is_terminal());
        assert!(!Phase::Running.is_terminal());
        assert!(Phase::Succeeded.is_terminal());
        assert!(Phase::Failed.is_terminal());
    }

    #[test]
    fn test_output_text_trims_line_endings_only() {
        let outcome = ExecutionOutcome {
            phase: Phase::Succeeded,
            reason: None,
            output: b"  5\r\n\n".to_vec(),
            mode: ExecutionMode::Local,
        };
        assert_eq!(outcome.output_text(), "  5");
    }
}
