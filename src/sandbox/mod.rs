use crate::error::SandboxError;
use crate::model::{ExecutionMode, InstanceSpec, PhaseReport};
use async_trait::async_trait;

/// An isolated runtime that can host execution instances.
///
/// Instances are addressed by the name chosen by the caller, so a name can be
/// handed to the cleanup coordinator before `create_instance` is even attempted.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Create and start the instance described by `spec`. Never retried.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), SandboxError>;

    async fn phase(&self, name: &str) -> Result<PhaseReport, SandboxError>;

    /// Full captured stdout/stderr of a terminated instance
    async fn fetch_output(&self, name: &str) -> Result<Vec<u8>, SandboxError>;

    /// Remove the instance and every supporting object created for it.
    /// Objects that no longer exist are skipped silently.
    async fn delete_instance(&self, name: &str) -> Result<(), SandboxError>;
}

/// Unique, DNS-1123 compatible instance name
pub fn instance_name() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "sandexec-run-{}-{}",
        nanos,
        hex::encode(rand::random::<[u8; 2]>())
    )
}

pub mod cluster;
pub mod local;

pub use cluster::ClusterBackend;
pub use local::LocalBackend;
