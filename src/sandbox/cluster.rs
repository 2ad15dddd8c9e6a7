//! Kubernetes execution backend.
//!
//! Each instance is a single-container pod with `restartPolicy: Never` plus a
//! ConfigMap of the same name holding the argument payload, which reaches the
//! harness through a `configMapKeyRef` environment variable.

use super::ExecutionBackend;
use crate::builder::ARGS_ENV;
use crate::error::SandboxError;
use crate::model::{ExecutionMode, InstanceSpec, Phase, PhaseReport};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapKeySelector, Container, EnvVar, EnvVarSource, Pod,
    PodSpec, PodStatus, ResourceRequirements, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, LogParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, info};

const PAYLOAD_KEY: &str = "args.json";
const MANAGED_BY: &str = "sandexec";

pub struct ClusterBackend {
    client: Client,
    namespace: String,
    /// Upper bound the pod itself enforces, independent of the watcher
    active_deadline_secs: i64,
}

impl ClusterBackend {
    pub fn new(client: Client, namespace: impl Into<String>, active_deadline_secs: i64) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            active_deadline_secs,
        }
    }

    /// Client from in-cluster config or the local kubeconfig
    pub async fn connect(
        namespace: impl Into<String>,
        active_deadline_secs: i64,
    ) -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace, active_deadline_secs))
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn metadata(name: &str) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

pub fn payload_config_map(spec: &InstanceSpec) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(PAYLOAD_KEY.to_string(), spec.payload.clone());
    ConfigMap {
        metadata: metadata(&spec.name),
        data: Some(data),
        ..Default::default()
    }
}

pub fn pod_manifest(spec: &InstanceSpec, active_deadline_secs: i64) -> Pod {
    let mut limits = BTreeMap::new();
    limits.insert(
        "cpu".to_string(),
        Quantity(format!("{}m", spec.limits.cpu_millis)),
    );
    limits.insert(
        "memory".to_string(),
        Quantity(format!("{}Mi", spec.limits.memory_mib)),
    );

    let container = Container {
        name: "submission".to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(vec![EnvVar {
            name: ARGS_ENV.to_string(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: Some(ConfigMapKeySelector {
                    name: Some(spec.name.clone()),
                    key: PAYLOAD_KEY.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(limits.clone()),
            limits: Some(limits),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(spec.privileges.run_as_non_root),
            run_as_user: Some(spec.privileges.run_as_user),
            allow_privilege_escalation: Some(spec.privileges.allow_privilege_escalation),
            privileged: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Pod {
        metadata: metadata(&spec.name),
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            automount_service_account_token: Some(false),
            enable_service_links: Some(false),
            active_deadline_seconds: Some(active_deadline_secs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Map a pod status onto the instance state machine
pub fn phase_of(status: Option<&PodStatus>) -> PhaseReport {
    let Some(status) = status else {
        return PhaseReport::new(Phase::Pending);
    };
    let phase = match status.phase.as_deref() {
        Some("Running") => Phase::Running,
        Some("Succeeded") => Phase::Succeeded,
        Some("Failed") => Phase::Failed,
        // Pending, Unknown and not-yet-reported
        _ => Phase::Pending,
    };

    let terminated = status
        .container_statuses
        .as_ref()
        .and_then(|all| all.first())
        .and_then(|cs| cs.state.as_ref())
        .and_then(|state| state.terminated.as_ref());

    let reason = match (&status.reason, &status.message, terminated) {
        (Some(reason), Some(message), _) => Some(format!("{}: {}", reason, message)),
        (Some(reason), None, _) => Some(reason.clone()),
        (None, _, Some(t)) if phase == Phase::Failed => Some(match &t.reason {
            Some(reason) => format!("{} (exit code {})", reason, t.exit_code),
            None => format!("exit code {}", t.exit_code),
        }),
        _ => None,
    };

    PhaseReport { phase, reason }
}

/// Drain a log body into raw bytes
pub async fn read_log<R: AsyncRead>(reader: R) -> Result<Vec<u8>, SandboxError> {
    futures::pin_mut!(reader);
    let mut output = Vec::new();
    reader
        .read_to_end(&mut output)
        .await
        .map_err(|e| SandboxError::retrieval("output", e))?;
    Ok(output)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl ExecutionBackend for ClusterBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Cluster
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), SandboxError> {
        let params = PostParams::default();
        self.config_maps()
            .create(&params, &payload_config_map(spec))
            .await
            .map_err(|e| SandboxError::LaunchFailed(format!("creating ConfigMap: {}", e)))?;

        self.pods()
            .create(&params, &pod_manifest(spec, self.active_deadline_secs))
            .await
            .map_err(|e| SandboxError::LaunchFailed(format!("creating pod: {}", e)))?;

        info!(name = %spec.name, namespace = %self.namespace, image = %spec.image, "pod created");
        Ok(())
    }

    async fn phase(&self, name: &str) -> Result<PhaseReport, SandboxError> {
        let pod = self
            .pods()
            .get(name)
            .await
            .map_err(|e| SandboxError::retrieval("phase", e))?;
        let report = phase_of(pod.status.as_ref());
        debug!(%name, phase = ?report.phase, "pod phase");
        Ok(report)
    }

    async fn fetch_output(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        // `logs` decodes to String and rejects non-UTF-8 program output
        let stream = self
            .pods()
            .log_stream(name, &LogParams::default())
            .await
            .map_err(|e| SandboxError::retrieval("output", e))?;
        read_log(stream).await
    }

    async fn delete_instance(&self, name: &str) -> Result<(), SandboxError> {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..DeleteParams::background()
        };
        let mut failures = Vec::new();

        if let Err(e) = self.pods().delete(name, &params).await {
            if !is_not_found(&e) {
                failures.push(format!("pod: {}", e));
            }
        }
        if let Err(e) = self.config_maps().delete(name, &params).await {
            if !is_not_found(&e) {
                failures.push(format!("ConfigMap: {}", e));
            }
        }

        if failures.is_empty() {
            debug!(%name, "pod and ConfigMap deleted");
            Ok(())
        } else {
            Err(SandboxError::cleanup(
                format!("instance {}", name),
                failures.join("; "),
            ))
        }
    }
}
