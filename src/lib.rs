// pipewright
// Declarative multi-stage pipeline orchestrator: a YAML definition of
// stages, jobs, and steps is validated, variable-substituted, turned into
// a dependency DAG, and executed with dependency-gated scheduling over
// bounded agent pools.

pub mod agent;
pub mod error;
pub mod execution;
pub mod logging;
pub mod parser;
pub mod variables;

// Re-export commonly used types
pub use error::{DefinitionError, RunError};

// Parser surface
pub use parser::{parse_file, parse_str, ParseError, ParseResult, Pipeline, PipelineValidator};

// Variable resolution
pub use variables::{resolve_pipeline, ScopeChain, UnresolvedVariable};

// Execution surface
pub use execution::{
    progress_channel, progress_stream, CancelHandle, ExecutionEvent, ExecutionGraph,
    FailureReport, PipelineScheduler, ProgressReceiver, ProgressSender, RunHandle, RunOptions,
    RunRecord, RunStatus, SchedulerConfig,
};

// Agent surface
pub use agent::{
    Agent, AgentError, AgentLease, AgentPool, CommandOutput, PoolSet, ShellAgent, TaskCall,
    TaskHandler, TaskRef, TaskRegistry, WorkingState,
};
