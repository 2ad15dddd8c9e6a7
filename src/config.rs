use crate::builder::{ArtifactBuilder, BaseImages};
use crate::docker::DockerCli;
use crate::executor::ExecutorSettings;
use crate::model::{ExecutionMode, PrivilegeConstraints, ResourceLimits};
use crate::sandbox::{ClusterBackend, ExecutionBackend, LocalBackend};
use crate::watcher::WatchPolicy;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "sandexec", version, about = "Run untrusted code submissions in a sandbox")]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "SANDEXEC_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Execute a single source file against a question definition and print the output
    Run(RunArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Cluster when running inside Kubernetes, local Docker otherwise
    Auto,
    Cluster,
    Local,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "SANDEXEC_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// SQLite file for the question catalog; in-memory when omitted
    #[arg(long, env = "SANDEXEC_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Question definition (JSON, same shape as the API)
    #[arg(long)]
    pub question: PathBuf,

    #[arg(long)]
    pub source: PathBuf,

    #[arg(long)]
    pub language: String,

    /// JSON array of call arguments
    #[arg(long, default_value = "[]")]
    pub args: String,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ExecutionArgs {
    #[arg(long, value_enum, env = "SANDEXEC_BACKEND", default_value_t = BackendChoice::Auto)]
    pub backend: BackendChoice,

    #[arg(long, env = "SANDEXEC_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Seconds to wait for an instance to terminate
    #[arg(long, env = "SANDEXEC_DEADLINE_SECS", default_value_t = 10)]
    pub deadline_secs: u64,

    #[arg(long, env = "SANDEXEC_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "SANDEXEC_BUILD_TIMEOUT_SECS", default_value_t = 120)]
    pub build_timeout_secs: u64,

    #[arg(long, env = "SANDEXEC_CPU_MILLIS", default_value_t = 500)]
    pub cpu_millis: u32,

    #[arg(long, env = "SANDEXEC_MEMORY_MIB", default_value_t = 128)]
    pub memory_mib: u64,

    #[arg(long, env = "SANDEXEC_RUN_AS_USER", default_value_t = 1000)]
    pub run_as_user: i64,

    /// Process limit, local backend only
    #[arg(long, env = "SANDEXEC_PIDS_LIMIT", default_value_t = 64)]
    pub pids_limit: i64,

    /// Registry to push artifacts to so cluster nodes can pull them
    #[arg(long, env = "SANDEXEC_REGISTRY")]
    pub registry: Option<String>,

    #[arg(long, env = "SANDEXEC_BUILD_TOOL", default_value = "docker")]
    pub build_tool: String,

    #[arg(long, env = "SANDEXEC_PYTHON_IMAGE", default_value = "python:3.12-slim")]
    pub python_image: String,

    #[arg(long, env = "SANDEXEC_GO_IMAGE", default_value = "golang:1.22-alpine")]
    pub go_image: String,

    #[arg(long, env = "SANDEXEC_GO_RUNTIME_IMAGE", default_value = "alpine:3.20")]
    pub go_runtime_image: String,
}

/// `KUBERNETES_SERVICE_HOST` is injected into every pod by the kubelet
pub fn resolve_mode(choice: BackendChoice, service_host: Option<&str>) -> ExecutionMode {
    match choice {
        BackendChoice::Cluster => ExecutionMode::Cluster,
        BackendChoice::Local => ExecutionMode::Local,
        BackendChoice::Auto => match service_host {
            Some(host) if !host.trim().is_empty() => ExecutionMode::Cluster,
            _ => ExecutionMode::Local,
        },
    }
}

impl ExecutionArgs {
    pub fn settings(&self) -> Result<ExecutorSettings> {
        if self.run_as_user <= 0 {
            anyhow::bail!("--run-as-user must be a non-root uid, got {}", self.run_as_user);
        }
        if self.deadline_secs == 0 || self.poll_interval_ms == 0 || self.build_timeout_secs == 0 {
            anyhow::bail!(
                "--deadline-secs, --poll-interval-ms and --build-timeout-secs must be positive"
            );
        }
        if self.cpu_millis == 0 {
            anyhow::bail!("--cpu-millis must be positive");
        }
        let memory_ok = self
            .memory_mib
            .checked_mul(1024 * 1024)
            .is_some_and(|bytes| i64::try_from(bytes).is_ok());
        if self.memory_mib == 0 || !memory_ok {
            anyhow::bail!("--memory-mib out of range: {}", self.memory_mib);
        }
        Ok(ExecutorSettings {
            limits: ResourceLimits {
                cpu_millis: self.cpu_millis,
                memory_mib: self.memory_mib,
                pids_limit: self.pids_limit,
            },
            privileges: PrivilegeConstraints {
                run_as_user: self.run_as_user,
                ..Default::default()
            },
            watch: WatchPolicy {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                deadline: Duration::from_secs(self.deadline_secs),
            },
            build_timeout: Duration::from_secs(self.build_timeout_secs),
        })
    }

    pub fn base_images(&self) -> BaseImages {
        BaseImages {
            python: self.python_image.clone(),
            go: self.go_image.clone(),
            go_runtime: self.go_runtime_image.clone(),
        }
    }

    pub fn artifact_builder(&self) -> ArtifactBuilder {
        let cli = DockerCli::new(self.build_tool.clone(), self.registry.is_some());
        ArtifactBuilder::new(
            Arc::new(cli),
            self.base_images(),
            self.registry.clone(),
            self.run_as_user,
        )
    }

    /// Connect the execution backend once, at startup
    pub async fn backend(&self) -> Result<Arc<dyn ExecutionBackend>> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok();
        let mode = resolve_mode(self.backend, host.as_deref());
        info!(%mode, requested = ?self.backend, "execution backend selected");

        let backend: Arc<dyn ExecutionBackend> = match mode {
            ExecutionMode::Cluster => {
                // The pod enforces its own deadline in case cleanup never reaches it
                let active_deadline = i64::try_from(self.deadline_secs)
                    .unwrap_or(i64::MAX)
                    .saturating_add(30);
                Arc::new(
                    ClusterBackend::connect(self.namespace.clone(), active_deadline)
                        .await
                        .context("Failed to create Kubernetes client")?,
                )
            }
            ExecutionMode::Local => Arc::new(
                LocalBackend::connect().context("Failed to connect to Docker daemon")?,
            ),
        };
        Ok(backend)
    }
}
