#![allow(dead_code)]
//! Scripted in-process fakes for the build tool and the execution backend.
//! Every create/delete is recorded so tests can assert exactly what was left behind.

use async_trait::async_trait;
use parking_lot::Mutex;
use sandexec::builder::{ArtifactBuilder, BaseImages, ImageBuilder};
use sandexec::catalog::{MemoryCatalog, Parameter, ParameterType, Question, ScalarType};
use sandexec::error::SandboxError;
use sandexec::model::{ExecutionMode, InstanceSpec, Phase, PhaseReport};
use sandexec::sandbox::ExecutionBackend;
use sandexec::watcher::WatchPolicy;
use sandexec::{Executor, ExecutorSettings};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct MockBackend {
    pub phases: Mutex<VecDeque<PhaseReport>>,
    pub output: Mutex<Vec<u8>>,
    pub fail_launch: bool,
    pub fail_phase: bool,
    pub fail_output: bool,
    pub fail_delete: bool,
    pub delete_delay: Option<Duration>,
    pub launched: Mutex<Vec<InstanceSpec>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Instance that runs briefly and then exits with `phase`
    pub fn finishing(phase: PhaseReport, output: &str) -> Self {
        let backend = Self::default();
        *backend.phases.lock() = vec![
            PhaseReport::new(Phase::Pending),
            PhaseReport::new(Phase::Running),
            phase,
        ]
        .into();
        *backend.output.lock() = output.as_bytes().to_vec();
        backend
    }

    /// Instance that never terminates
    pub fn hanging() -> Self {
        let backend = Self::default();
        *backend.phases.lock() = vec![PhaseReport::new(Phase::Running)].into();
        backend
    }

    pub fn launched_names(&self) -> Vec<String> {
        self.launched.lock().iter().map(|s| s.name.clone()).collect()
    }

    /// Names handed to `create_instance` and never deleted
    pub fn live(&self) -> Vec<String> {
        let deleted = self.deleted.lock();
        self.launched_names()
            .into_iter()
            .filter(|name| !deleted.contains(name))
            .collect()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), SandboxError> {
        self.launched.lock().push(spec.clone());
        if self.fail_launch {
            return Err(SandboxError::LaunchFailed("quota exceeded".to_string()));
        }
        Ok(())
    }

    async fn phase(&self, _name: &str) -> Result<PhaseReport, SandboxError> {
        if self.fail_phase {
            return Err(SandboxError::retrieval("phase", "connection reset"));
        }
        let mut phases = self.phases.lock();
        if phases.len() > 1 {
            if let Some(next) = phases.pop_front() {
                return Ok(next);
            }
        }
        Ok(phases
            .front()
            .cloned()
            .unwrap_or_else(|| PhaseReport::new(Phase::Pending)))
    }

    async fn fetch_output(&self, _name: &str) -> Result<Vec<u8>, SandboxError> {
        if self.fail_output {
            return Err(SandboxError::retrieval("output", "log stream closed"));
        }
        Ok(self.output.lock().clone())
    }

    async fn delete_instance(&self, name: &str) -> Result<(), SandboxError> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_delete {
            return Err(SandboxError::cleanup(format!("instance {}", name), "api unavailable"));
        }
        self.deleted.lock().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockImages {
    pub fail_build: Option<String>,
    pub fail_remove: bool,
    pub build_delay: Option<Duration>,
    /// (tag, Dockerfile contents) per build attempt
    pub builds: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<String>>,
}

impl MockImages {
    pub fn failing(diagnostics: &str) -> Self {
        Self {
            fail_build: Some(diagnostics.to_string()),
            ..Default::default()
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().len()
    }

    /// Tags built and never removed
    pub fn live(&self) -> Vec<String> {
        let removed = self.removed.lock();
        self.builds
            .lock()
            .iter()
            .map(|(tag, _)| tag.clone())
            .filter(|tag| !removed.contains(tag))
            .collect()
    }
}

#[async_trait]
impl ImageBuilder for MockImages {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), SandboxError> {
        let dockerfile = std::fs::read_to_string(context.join("Dockerfile"))
            .map_err(|e| SandboxError::build_failed(e.to_string()))?;
        self.builds.lock().push((tag.to_string(), dockerfile));
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_build {
            Some(diagnostics) => Err(SandboxError::build_failed(diagnostics.clone())),
            None => Ok(()),
        }
    }

    async fn remove_image(&self, tag: &str) -> Result<(), SandboxError> {
        if self.fail_remove {
            return Err(SandboxError::cleanup(format!("image {}", tag), "daemon busy"));
        }
        self.removed.lock().push(tag.to_string());
        Ok(())
    }
}

pub fn int_param(name: &str, position: u32) -> Parameter {
    Parameter {
        name: name.to_string(),
        kind: ParameterType::Scalar(ScalarType::Int),
        position,
    }
}

/// Question 1: `add(a int, b int)`
pub fn add_question() -> Question {
    Question {
        code: 1,
        title: "Add two numbers".to_string(),
        description: "Return a + b".to_string(),
        entry_point: "add".to_string(),
        templates: BTreeMap::new(),
        parameters: vec![int_param("b", 1), int_param("a", 0)],
    }
}

pub fn fast_settings() -> ExecutorSettings {
    ExecutorSettings {
        watch: WatchPolicy {
            poll_interval: Duration::from_millis(5),
            deadline: Duration::from_millis(200),
        },
        build_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn executor(
    backend: Arc<MockBackend>,
    images: Arc<MockImages>,
    settings: ExecutorSettings,
) -> Executor {
    let builder = ArtifactBuilder::new(images, BaseImages::default(), None, 1000);
    Executor::new(
        Arc::new(MemoryCatalog::with_questions([add_question()])),
        builder,
        backend,
        settings,
    )
}
