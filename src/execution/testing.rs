// Test support: a scripted in-process agent.
// Interprets a tiny command language so scheduler and executor tests can
// exercise ordering, failure, and slowness without a real shell:
//   "fail ..."      -> exit code 1 with stderr
//   "sleep <ms>"    -> sleeps, then exit code 0
//   anything else   -> exit code 0, echoing the script on stdout
// Every call is appended to a shared log in execution order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{Agent, AgentError, CommandOutput, TaskCall, WorkingState};

#[derive(Clone, Default)]
pub(crate) struct ScriptedAgent {
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAgent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    async fn interpret(&self, command: &str) -> CommandOutput {
        if let Some(ms) = command
            .strip_prefix("sleep ")
            .and_then(|rest| rest.trim().parse::<u64>().ok())
        {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            };
        }

        if command.starts_with("fail") {
            return CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "boom".to_string(),
            };
        }

        CommandOutput {
            exit_code: 0,
            stdout: format!("{}\n", command),
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn run_script(
        &self,
        script: &str,
        _state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError> {
        self.record(script.to_string());
        Ok(self.interpret(script).await)
    }

    async fn run_task(
        &self,
        call: &TaskCall,
        _state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError> {
        self.record(format!("task:{}", call.reference));
        let command = call.inputs.get("script").cloned().unwrap_or_default();
        Ok(self.interpret(&command).await)
    }
}
