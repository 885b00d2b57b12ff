use std::process::Output;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session_readiness::{Backend, BackendError};
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_CONTAINER: &str = "consoley-desktop";
pub const DEFAULT_IMAGE: &str = "consoleai/desktop:latest";

/// Shell commands backing each worker operation. An empty command marks the
/// operation as unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    pub start: String,
    pub stop: String,
    pub restart: String,
    pub logs: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            start: format!(
                "docker start {DEFAULT_CONTAINER} 2>/dev/null || \
                 docker run -d --name {DEFAULT_CONTAINER} -p 5800:5800 -p 6070:6070 {DEFAULT_IMAGE}"
            ),
            stop: format!("docker stop {DEFAULT_CONTAINER}"),
            restart: format!("docker restart {DEFAULT_CONTAINER}"),
            logs: format!("docker logs --tail 200 {DEFAULT_CONTAINER}"),
        }
    }
}

/// Runs the configured commands through the platform shell. A non-zero exit
/// is a rejection carrying the command's stderr.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    commands: CommandSet,
}

impl CommandBackend {
    pub fn new(commands: CommandSet) -> Self {
        Self { commands }
    }

    async fn run(&self, operation: &'static str, command: &str) -> Result<String, BackendError> {
        if command.trim().is_empty() {
            return Err(BackendError::Unsupported(operation));
        }
        debug!(target = "consoley.backend", operation, command, "running backend command");
        let output = shell(command).kill_on_drop(true).output().await?;
        check_status(operation, output)
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn check_status(operation: &'static str, output: Output) -> Result<String, BackendError> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    let detail = if detail.is_empty() { stdout.as_str() } else { detail };
    Err(BackendError::Rejected(format!(
        "{operation} command exited with {}: {detail}",
        output.status
    )))
}

#[async_trait]
impl Backend for CommandBackend {
    async fn start_container(&self) -> Result<String, BackendError> {
        let stdout = self.run("start", &self.commands.start).await?;
        // The last line is the worker id; earlier lines are pull progress.
        let worker_id = stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .unwrap_or(DEFAULT_CONTAINER)
            .to_string();
        info!(target = "consoley.backend", worker_id, "worker started");
        Ok(worker_id)
    }

    async fn stop_container(&self) -> Result<(), BackendError> {
        self.run("stop", &self.commands.stop).await?;
        info!(target = "consoley.backend", "worker stopped");
        Ok(())
    }

    async fn restart_container(&self) -> Result<(), BackendError> {
        self.run("restart", &self.commands.restart).await?;
        info!(target = "consoley.backend", "worker restarted");
        Ok(())
    }

    async fn container_logs(&self) -> Result<String, BackendError> {
        self.run("logs", &self.commands.logs).await
    }
}
