//! Workload hooks run as local processes

use crate::collaborators::{async_trait, CollabResult, WorkloadControl};
use crate::config::WorkloadHooks;
use crate::error::CollaboratorError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SERVICE: &str = "workloads";

/// Runs the configured shell hooks. Children are killed when their time
/// budget runs out.
#[derive(Debug, Clone)]
pub struct CommandWorkloads {
    hooks: WorkloadHooks,
}

impl CommandWorkloads {
    pub fn new(hooks: WorkloadHooks) -> Self {
        Self { hooks }
    }

    async fn run_hooks(&self, hook: &str, commands: &[String], timeout: Duration) -> CollabResult<()> {
        if commands.is_empty() {
            debug!(hook = %hook, "No commands configured");
            return Ok(());
        }

        let run_all = async {
            for command in commands {
                let mut child = Command::new("sh");
                child.arg("-c").arg(command);
                run(child, command).await?;
            }
            Ok::<(), CollaboratorError>(())
        };

        match tokio::time::timeout(timeout, run_all).await {
            Ok(result) => {
                if result.is_ok() {
                    info!(hook = %hook, commands = commands.len(), "Workload hook completed");
                }
                result
            }
            Err(_) => Err(CollaboratorError::Timeout {
                service: SERVICE,
                timeout,
            }),
        }
    }
}

async fn run(mut command: Command, label: &str) -> CollabResult<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CollaboratorError::unavailable(SERVICE, format!("{}: {}", label, e)))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(CollaboratorError::unavailable(
        SERVICE,
        format!("`{}` exited with {}: {}", label, output.status, stderr.trim()),
    ))
}

#[async_trait]
impl WorkloadControl for CommandWorkloads {
    async fn quiesce(&self, timeout: Duration) -> CollabResult<()> {
        self.run_hooks("quiesce", &self.hooks.quiesce, timeout).await
    }

    async fn flush(&self, timeout: Duration) -> CollabResult<()> {
        self.run_hooks("flush", &self.hooks.flush, timeout).await
    }

    async fn backup(&self, timeout: Duration) -> CollabResult<()> {
        self.run_hooks("backup", &self.hooks.backup, timeout).await
    }

    async fn stop_non_essential(&self, timeout: Duration) -> CollabResult<usize> {
        let mut stopped = 0;
        for service in &self.hooks.non_essential_services {
            let mut command = Command::new("docker");
            command.arg("stop").arg(service);
            match tokio::time::timeout(timeout, run(command, service)).await {
                Ok(Ok(())) => {
                    info!(service = %service, "Stopped non-essential service");
                    stopped += 1;
                }
                Ok(Err(e)) => warn!(service = %service, error = %e, "Failed to stop service"),
                Err(_) => warn!(service = %service, "Timed out stopping service"),
            }
        }
        Ok(stopped)
    }
}
