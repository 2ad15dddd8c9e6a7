pub mod builder;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod docker;
pub mod error;
pub mod executor;
pub mod model;
pub mod sandbox;
pub mod server;
pub mod telemetry;
pub mod watcher;

pub use error::SandboxError;
pub use executor::{ExecuteRequest, Executor, ExecutorSettings};
pub use model::{ExecutionMode, ExecutionOutcome, Language, Phase};
