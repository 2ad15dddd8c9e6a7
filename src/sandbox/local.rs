// Local execution backend: one hardened Docker container per instance.
// Used when no cluster is configured; limits the local runtime cannot express are skipped.
use super::ExecutionBackend;
use crate::builder::ARGS_ENV;
use crate::error::SandboxError;
use crate::model::{ExecutionMode, InstanceSpec, Phase, PhaseReport};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, ContainerState, ContainerStateStatusEnum, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

pub struct LocalBackend {
    docker: Docker,
}

impl LocalBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self, bollard::errors::Error> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }
}

pub fn container_config(spec: &InstanceSpec) -> ContainerCreateBody {
    let user = spec.privileges.run_as_user.to_string();
    let mut security_opt = Vec::new();
    if !spec.privileges.allow_privilege_escalation {
        security_opt.push("no-new-privileges".to_string());
    }

    let memory = memory_bytes(spec.limits.memory_mib);

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(vec![format!("{}={}", ARGS_ENV, spec.payload)]),
        user: Some(format!("{}:{}", user, user)),
        network_disabled: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            memory: Some(memory),
            memory_swap: Some(memory),
            nano_cpus: Some(i64::from(spec.limits.cpu_millis) * 1_000_000),
            pids_limit: Some(spec.limits.pids_limit),
            network_mode: Some("none".to_string()),
            security_opt: Some(security_opt),
            cap_drop: Some(vec!["ALL".to_string()]),
            privileged: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Memory limit in bytes, saturating at the largest value Docker accepts
pub fn memory_bytes(mib: u64) -> i64 {
    mib.checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .unwrap_or(i64::MAX)
}

/// Map a Docker container state onto the instance state machine
pub fn phase_of(state: Option<&ContainerState>) -> PhaseReport {
    let Some(state) = state else {
        return PhaseReport::new(Phase::Pending);
    };
    match state.status {
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::PAUSED)
        | Some(ContainerStateStatusEnum::RESTARTING)
        | Some(ContainerStateStatusEnum::REMOVING) => PhaseReport::new(Phase::Running),
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            let exit_code = state.exit_code.unwrap_or(-1);
            if exit_code == 0 {
                return PhaseReport::new(Phase::Succeeded);
            }
            let mut reason = format!("exit code {}", exit_code);
            if state.oom_killed == Some(true) {
                reason = format!("OOMKilled ({})", reason);
            }
            if let Some(error) = state.error.as_deref().filter(|e| !e.is_empty()) {
                reason = format!("{}: {}", reason, error);
            }
            PhaseReport::with_reason(Phase::Failed, reason)
        }
        _ => PhaseReport::new(Phase::Pending),
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), SandboxError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(spec.name.clone()),
            ..Default::default()
        });
        self.docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| SandboxError::LaunchFailed(format!("creating container: {}", e)))?;

        self.docker
            .start_container(&spec.name, None::<BollardStartContainerOptionsQuery>)
            .await
            .map_err(|e| SandboxError::LaunchFailed(format!("starting container: {}", e)))?;

        info!(name = %spec.name, image = %spec.image, "container started");
        Ok(())
    }

    async fn phase(&self, name: &str) -> Result<PhaseReport, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(name, None::<BollardInspectContainerOptionsQuery>)
            .await
            .map_err(|e| SandboxError::retrieval("phase", e))?;
        let report = phase_of(inspect.state.as_ref());
        debug!(%name, phase = ?report.phase, "container phase");
        Ok(report)
    }

    async fn fetch_output(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        let mut stream = self.docker.logs(
            name,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => output.extend_from_slice(&message),
                Ok(_) => {}
                Err(e) => return Err(SandboxError::retrieval("output", e)),
            }
        }
        Ok(output)
    }

    async fn delete_instance(&self, name: &str) -> Result<(), SandboxError> {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(name, options).await {
            Ok(()) => {
                debug!(%name, "container removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::cleanup(format!("container {}", name), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrivilegeConstraints, ResourceLimits};

    fn spec() -> InstanceSpec {
        InstanceSpec {
            name: "sandexec-run-2-beef".into(),
            image: "sandexec-go:00ff".into(),
            payload: r#"["a b",1]"#.into(),
            limits: ResourceLimits {
                cpu_millis: 250,
                memory_mib: 64,
                pids_limit: 32,
            },
            privileges: PrivilegeConstraints::default(),
        }
    }

    #[test]
    fn test_container_config_applies_limits_and_privileges() {
        let config = container_config(&spec());
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(
            config.env,
            Some(vec![r#"SANDBOX_ARGS=["a b",1]"#.to_string()])
        );

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(250_000_000));
        assert_eq!(host.pids_limit, Some(32));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.security_opt, Some(vec!["no-new-privileges".to_string()]));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
    }

    #[test]
    fn test_memory_limit_never_wraps() {
        assert_eq!(memory_bytes(128), 128 * 1024 * 1024);
        assert_eq!(memory_bytes(u64::MAX), i64::MAX);
        assert_eq!(memory_bytes(u64::MAX / (1024 * 1024)), i64::MAX);
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(phase_of(None).phase, Phase::Pending);

        let created = ContainerState {
            status: Some(ContainerStateStatusEnum::CREATED),
            ..Default::default()
        };
        assert_eq!(phase_of(Some(&created)).phase, Phase::Pending);

        let running = ContainerState {
            status: Some(ContainerStateStatusEnum::RUNNING),
            ..Default::default()
        };
        assert_eq!(phase_of(Some(&running)).phase, Phase::Running);

        let ok = ContainerState {
            status: Some(ContainerStateStatusEnum::EXITED),
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(phase_of(Some(&ok)), PhaseReport::new(Phase::Succeeded));
    }

    #[test]
    fn test_failed_exit_reports_reason() {
        let oom = ContainerState {
            status: Some(ContainerStateStatusEnum::EXITED),
            exit_code: Some(137),
            oom_killed: Some(true),
            ..Default::default()
        };
        let report = phase_of(Some(&oom));
        assert_eq!(report.phase, Phase::Failed);
        assert_eq!(report.reason.as_deref(), Some("OOMKilled (exit code 137)"));
    }
}
