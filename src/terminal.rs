use crate::error::AssistantError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Side-effecting command execution requested from the chat panel.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Starts `command` and returns an acknowledgement; output is not captured.
    async fn run_command(&self, command: &str) -> Result<String, AssistantError>;
}

/// Launches commands through the platform shell, detached from the assistant.
pub struct ShellCommandRunner {
    working_dir: PathBuf,
}

impl ShellCommandRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run_command(&self, command: &str) -> Result<String, AssistantError> {
        log::info!("Executing command: {}", command);
        let mut child = Self::shell_command(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AssistantError::CommandExecutionFailure {
                command: command.to_string(),
                source,
            })?;

        // Reap in the background so the child never lingers as a zombie.
        let command_text = command.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => log::debug!("Command '{}' exited with {}", command_text, status),
                Err(e) => log::warn!("Failed to wait for command '{}': {}", command_text, e),
            }
        });

        Ok(format!("Executing command: {}", command))
    }
}
