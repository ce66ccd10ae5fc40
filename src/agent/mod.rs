// Agent abstraction
// The orchestrator treats script/task execution as opaque external calls:
// potentially slow, potentially failing, never interpreted beyond exit
// code and captured output.

pub mod pool;
pub mod shell;
pub mod task;

pub use pool::{AgentLease, AgentPool, PoolSet};
pub use shell::ShellAgent;
pub use task::{TaskCall, TaskHandler, TaskRef, TaskRegistry};

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the agent boundary. These become step failures, not panics.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to launch process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("no usable shell found on this host")]
    NoShell,

    #[error("unknown task kind '{0}'")]
    UnknownTaskKind(String),

    #[error("task '{task}' is missing required input '{input}'")]
    MissingInput { task: String, input: String },

    #[error("agent pool '{0}' is closed")]
    PoolClosed(String),
}

/// Mutable per-job execution state, preserved across the steps of one job:
/// the working directory and the environment the agent launches processes
/// with.
#[derive(Debug, Clone)]
pub struct WorkingState {
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
}

impl WorkingState {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// What came back from one external call.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An execution environment that can run a script or a typed task.
///
/// Implementations may block for unbounded wall-clock time; the executor
/// gives each job its own task of control and applies timeouts around
/// these calls.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run opaque shell text, returning its exit code and captured output.
    async fn run_script(
        &self,
        script: &str,
        state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError>;

    /// Run a typed task by kind. Unknown kinds are rejected during
    /// validation; hitting one here is an agent error.
    async fn run_task(
        &self,
        call: &TaskCall,
        state: &mut WorkingState,
    ) -> Result<CommandOutput, AgentError>;
}
