use crate::error::SandboxError;
use crate::model::{Phase, PhaseReport};
use crate::sandbox::ExecutionBackend;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct WatchPolicy {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Poll `name` at a fixed interval until it reaches Succeeded or Failed.
///
/// This is the only suspension point of a pipeline run. Dropping the returned future
/// stops polling immediately; the deadline yields `Timeout` and leaves deletion of the
/// instance to the cleanup coordinator.
pub async fn await_terminal(
    backend: &dyn ExecutionBackend,
    name: &str,
    policy: WatchPolicy,
) -> Result<PhaseReport, SandboxError> {
    let poll = async {
        let mut ticker = tokio::time::interval(policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Phase> = None;
        loop {
            ticker.tick().await;
            let report = backend.phase(name).await?;
            if last != Some(report.phase) {
                debug!(%name, from = ?last, to = ?report.phase, "phase transition");
                last = Some(report.phase);
            }
            if report.phase.is_terminal() {
                return Ok(report);
            }
        }
    };

    match tokio::time::timeout(policy.deadline, poll).await {
        Ok(result) => result,
        Err(_) => {
            warn!(%name, deadline = ?policy.deadline, "instance did not terminate in time");
            Err(SandboxError::Timeout {
                deadline: policy.deadline,
            })
        }
    }
}
