// Shell Agent
// Executes scripts through the system shell with captured output; task
// steps dispatch through the registry and run as rendered shell text.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::agent::task::{TaskCall, TaskRegistry};
use crate::agent::{Agent, AgentError, CommandOutput, WorkingState};

/// Agent backed by the host's shell.
pub struct ShellAgent {
    shell: PathBuf,
    registry: Arc<TaskRegistry>,
}

impl ShellAgent {
    /// Locate a shell (`bash`, falling back to `sh`) and wire up the task
    /// registry.
    pub fn new(registry: Arc<TaskRegistry>) -> Result<Self, AgentError> {
        let shell = find_shell().ok_or(AgentError::NoShell)?;
        Ok(Self { shell, registry })
    }

    /// Use an explicit shell executable instead of discovering one.
    pub fn with_shell(shell: PathBuf, registry: Arc<TaskRegistry>) -> Self {
        Self { shell, registry }
    }

    async fn run(&self, command: &str, state: &WorkingState) -> Result<CommandOutput, AgentError> {
        debug!(shell = %self.shell.display(), dir = %state.working_dir.display(), "launching step process");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&state.working_dir)
            .envs(&state.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl Agent for ShellAgent {
    async fn run_script(
        &self,
        script: &str,
        state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError> {
        self.run(script, state).await
    }

    async fn run_task(
        &self,
        call: &TaskCall,
        state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError> {
        let handler = self.registry.handler(&call.reference.kind)?;
        let command = handler.render(call)?;
        self.run(&command, state).await
    }
}

fn find_shell() -> Option<PathBuf> {
    which::which("bash").or_else(|_| which::which("sh")).ok()
}
