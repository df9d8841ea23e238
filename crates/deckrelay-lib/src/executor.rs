//! Local command execution on the panel host

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Output of a finished local command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs shell commands on this host
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<ExecOutput, RelayError>;
}

/// Runs commands through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

#[async_trait]
impl LocalExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput, RelayError> {
        debug!(command = %command, "Executing local command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!(command = %command, status = %output.status, "Local command failed");
            return Err(RelayError::LocalExecution {
                message: format!("Command failed: {} ({})", command, output.status),
                stderr,
            });
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
