// Execution module
// Graph building, scheduling, job/step execution, and run results

pub mod events;
pub mod executor;
pub mod graph;
pub mod run;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{
    progress_channel, progress_stream, EventSender, ExecutionEvent, ProgressReceiver,
    ProgressSender,
};
pub use graph::{ExecutionGraph, JobNode, StageNode};
pub use run::{FailureReport, JobRecord, RunHandle, RunRecord, RunStatus, StageRecord, StepRecord};
pub use scheduler::{CancelHandle, PipelineScheduler, RunOptions, SchedulerConfig};
