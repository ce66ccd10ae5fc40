// Job/Step Executor
// Runs the jobs of one dispatched stage: job levels execute concurrently,
// each job on its own leased agent; steps run strictly in declaration
// order, sharing a WorkingState for the life of the job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::pool::{AgentLease, PoolSet};
use crate::agent::task::{TaskCall, TaskRef};
use crate::agent::{AgentError, CommandOutput, WorkingState};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::run::{RunHandle, RunStatus};
use crate::execution::scheduler::SchedulerConfig;
use crate::parser::models::{Job, Pool, Stage, Step, StepAction};

/// Resolves only when cancellation is signalled; pends forever otherwise.
pub(crate) async fn cancellation(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: this run can no longer be canceled.
            std::future::pending::<()>().await;
        }
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Everything one dispatched stage needs to run its jobs.
///
/// The stage record is already marked Running by the scheduler; this type
/// owns the stage from there to a terminal status.
pub(crate) struct StageExecution {
    pub stage_index: usize,
    pub stage: Stage,
    pub job_levels: Vec<Vec<usize>>,
    pub pipeline_pool: Option<Pool>,
    pub pools: Arc<PoolSet>,
    pub run: RunHandle,
    pub events: Option<ProgressSender>,
    pub cancel: watch::Receiver<bool>,
    pub config: Arc<SchedulerConfig>,
}

impl StageExecution {
    pub(crate) async fn execute(self) -> RunStatus {
        let stage_name = self.stage.stage.clone();
        debug!(stage = %stage_name, "executing stage jobs");

        let mut failed_job: Option<String> = None;
        let mut canceled = false;

        for level in &self.job_levels {
            if canceled || *self.cancel.borrow() {
                canceled = true;
                break;
            }

            if let Some(failed) = &failed_job {
                let reason = format!("job '{}' failed earlier in the stage", failed);
                for &job_idx in level {
                    self.skip_job(job_idx, &reason);
                }
                continue;
            }

            let mut set = JoinSet::new();
            for &job_idx in level {
                let job = self.stage.jobs[job_idx].clone();
                let pool = self.pools.resolve(&[
                    job.pool.as_ref(),
                    self.stage.pool.as_ref(),
                    self.pipeline_pool.as_ref(),
                ]);
                let execution = JobExecution {
                    stage_index: self.stage_index,
                    job_index: job_idx,
                    stage_name: stage_name.clone(),
                    job,
                    pool,
                    run: self.run.clone(),
                    events: self.events.clone(),
                    cancel: self.cancel.clone(),
                    config: Arc::clone(&self.config),
                };
                set.spawn(async move { (job_idx, execution.execute().await) });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((job_idx, status)) => match status {
                        RunStatus::Failed => {
                            failed_job
                                .get_or_insert_with(|| self.stage.jobs[job_idx].job.clone());
                        }
                        RunStatus::Canceled => canceled = true,
                        _ => {}
                    },
                    Err(join_err) => {
                        warn!(stage = %stage_name, error = %join_err, "job task did not complete");
                        failed_job.get_or_insert_with(|| "unknown".to_string());
                    }
                }
            }
        }

        let status = if canceled {
            RunStatus::Canceled
        } else if failed_job.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let stage_index = self.stage_index;
        self.run.update(|record| {
            if canceled {
                record.finalize_stage(stage_index, RunStatus::Canceled, "run canceled");
            } else {
                let stage = record.stage_mut(stage_index);
                stage.status = status;
                stage.finished_at = Some(SystemTime::now());
                if let Some(failed) = &failed_job {
                    stage.reason = Some(format!("job '{}' failed", failed));
                }
            }
        });

        self.events.send_event(ExecutionEvent::StageCompleted {
            stage: stage_name,
            status,
        });
        status
    }

    fn skip_job(&self, job_idx: usize, reason: &str) {
        let stage_index = self.stage_index;
        self.run.update(|record| {
            record.finalize_job(stage_index, job_idx, RunStatus::Skipped, reason);
        });
        self.events.send_event(ExecutionEvent::JobCompleted {
            stage: self.stage.stage.clone(),
            job: self.stage.jobs[job_idx].job.clone(),
            status: RunStatus::Skipped,
        });
    }
}

/// One job bound to one leased agent.
struct JobExecution {
    stage_index: usize,
    job_index: usize,
    stage_name: String,
    job: Job,
    pool: Arc<crate::agent::pool::AgentPool>,
    run: RunHandle,
    events: Option<ProgressSender>,
    cancel: watch::Receiver<bool>,
    config: Arc<SchedulerConfig>,
}

/// What happened to a single step's external call.
enum StepOutcome {
    Completed(CommandOutput),
    AgentFailed(AgentError),
    TimedOut(Duration),
    Canceled,
}

impl JobExecution {
    async fn execute(self) -> RunStatus {
        let (stage_index, job_index) = (self.stage_index, self.job_index);
        self.run.update(|record| {
            let job = record.job_mut(stage_index, job_index);
            job.status = RunStatus::Running;
            job.started_at = Some(SystemTime::now());
        });
        self.events.send_event(ExecutionEvent::JobStarted {
            stage: self.stage_name.clone(),
            job: self.job.job.clone(),
        });
        debug!(stage = %self.stage_name, job = %self.job.job, "job started");

        // The lease is held for the whole job and released on every exit
        // path by drop, including timeout and cancellation.
        let lease = match self.pool.lease().await {
            Ok(lease) => lease,
            Err(err) => {
                let reason = err.to_string();
                self.run.update(|record| {
                    record.finalize_job(stage_index, job_index, RunStatus::Failed, &reason);
                });
                return self.finish(RunStatus::Failed);
            }
        };

        let status = match self.job.timeout_in_minutes.map(minutes) {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run_steps(&lease)).await {
                    Ok(status) => status,
                    Err(_) => {
                        let reason =
                            format!("job timed out after {} seconds", limit.as_secs());
                        self.run.update(|record| {
                            record.finalize_job(
                                stage_index,
                                job_index,
                                RunStatus::Failed,
                                &reason,
                            );
                        });
                        return self.finish(RunStatus::Failed);
                    }
                }
            }
            None => self.run_steps(&lease).await,
        };

        self.run.update(|record| {
            let job = record.job_mut(stage_index, job_index);
            if !job.status.is_terminal() {
                job.status = status;
                job.finished_at = Some(SystemTime::now());
            }
        });
        self.finish(status)
    }

    fn finish(&self, status: RunStatus) -> RunStatus {
        self.events.send_event(ExecutionEvent::JobCompleted {
            stage: self.stage_name.clone(),
            job: self.job.job.clone(),
            status,
        });
        status
    }

    /// Run the job's steps strictly in declaration order.
    async fn run_steps(&self, lease: &AgentLease) -> RunStatus {
        let mut state = WorkingState::new(self.config.workspace.clone());
        let mut job_status = RunStatus::Succeeded;
        let mut canceled = false;

        for (step_index, step) in self.job.steps.iter().enumerate() {
            if canceled || *self.cancel.borrow() {
                canceled = true;
                self.record_unrun(step_index, RunStatus::Canceled, "run canceled");
                continue;
            }

            if job_status == RunStatus::Failed {
                self.record_unrun(step_index, RunStatus::Skipped, "a previous step failed");
                continue;
            }

            self.start_step(step_index);
            let outcome = self.run_step(lease, step, &mut state).await;
            match self.record_outcome(step_index, outcome) {
                RunStatus::Failed if !step.continue_on_error => job_status = RunStatus::Failed,
                RunStatus::Canceled => canceled = true,
                _ => {}
            }
        }

        if canceled {
            RunStatus::Canceled
        } else {
            job_status
        }
    }

    async fn run_step(
        &self,
        lease: &AgentLease,
        step: &Step,
        state: &mut WorkingState,
    ) -> StepOutcome {
        // A script step's workingDirectory updates the job's persistent
        // working state; the step env overlay does not.
        if let StepAction::Script(script) = &step.action {
            if let Some(dir) = &script.working_directory {
                state.working_dir = PathBuf::from(dir);
            }
        }

        let mut effective = state.clone();
        effective.env.extend(step.env.clone());

        let call = async {
            match &step.action {
                StepAction::Script(script) => {
                    lease.agent().run_script(&script.script, &mut effective).await
                }
                StepAction::Task(task) => match TaskRef::parse(&task.task) {
                    Some(reference) => {
                        let call = TaskCall {
                            reference,
                            inputs: task.inputs.clone(),
                        };
                        lease.agent().run_task(&call, &mut effective).await
                    }
                    // Rejected by validation; only reachable when a caller
                    // bypasses it.
                    None => Err(AgentError::UnknownTaskKind(task.task.clone())),
                },
            }
        };

        let timeout = step
            .timeout_in_minutes
            .map(minutes)
            .or(self.config.default_step_timeout);

        let guarded = async {
            tokio::select! {
                _ = cancellation(self.cancel.clone()) => StepOutcome::Canceled,
                result = call => match result {
                    Ok(output) => StepOutcome::Completed(output),
                    Err(err) => StepOutcome::AgentFailed(err),
                },
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => StepOutcome::TimedOut(limit),
            },
            None => guarded.await,
        }
    }

    fn start_step(&self, step_index: usize) {
        let (stage_index, job_index) = (self.stage_index, self.job_index);
        self.run.update(|record| {
            let step = record.step_mut(stage_index, job_index, step_index);
            step.status = RunStatus::Running;
            step.started_at = Some(SystemTime::now());
        });
        self.events.send_event(ExecutionEvent::StepStarted {
            stage: self.stage_name.clone(),
            job: self.job.job.clone(),
            step_index,
            label: self.job.steps[step_index].label(),
        });
    }

    /// Write the final step record and emit its events; returns the step's
    /// terminal status.
    fn record_outcome(&self, step_index: usize, outcome: StepOutcome) -> RunStatus {
        let (stage_index, job_index) = (self.stage_index, self.job_index);

        let (status, output, error, exit_code, reason) = match outcome {
            StepOutcome::Completed(out) => {
                let status = if out.success() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
                let reason = (!out.success())
                    .then(|| format!("exited with code {}", out.exit_code));
                let error = (!out.stderr.is_empty()).then(|| out.stderr.clone());
                (status, out.stdout, error, Some(out.exit_code), reason)
            }
            StepOutcome::AgentFailed(err) => (
                RunStatus::Failed,
                String::new(),
                None,
                None,
                Some(err.to_string()),
            ),
            StepOutcome::TimedOut(limit) => (
                RunStatus::Failed,
                String::new(),
                None,
                None,
                Some(format!("timed out after {} seconds", limit.as_secs())),
            ),
            StepOutcome::Canceled => (
                RunStatus::Canceled,
                String::new(),
                None,
                None,
                Some("run canceled".to_string()),
            ),
        };

        self.run.update(|record| {
            let record = record.step_mut(stage_index, job_index, step_index);
            record.status = status;
            record.output = output.clone();
            record.error = error.clone();
            record.exit_code = exit_code;
            record.reason = reason;
            record.finished_at = Some(SystemTime::now());
        });

        if !output.is_empty() {
            self.events.send_event(ExecutionEvent::StepOutput {
                stage: self.stage_name.clone(),
                job: self.job.job.clone(),
                step_index,
                output,
                is_error: false,
            });
        }
        if let Some(stderr) = error {
            self.events.send_event(ExecutionEvent::StepOutput {
                stage: self.stage_name.clone(),
                job: self.job.job.clone(),
                step_index,
                output: stderr,
                is_error: true,
            });
        }
        self.events.send_event(ExecutionEvent::StepCompleted {
            stage: self.stage_name.clone(),
            job: self.job.job.clone(),
            step_index,
            status,
            exit_code,
        });

        status
    }

    fn record_unrun(&self, step_index: usize, status: RunStatus, reason: &str) {
        let (stage_index, job_index) = (self.stage_index, self.job_index);
        self.run.update(|record| {
            let step = record.step_mut(stage_index, job_index, step_index);
            step.status = status;
            step.reason = Some(reason.to_string());
            step.finished_at = Some(SystemTime::now());
        });
        self.events.send_event(ExecutionEvent::StepCompleted {
            stage: self.stage_name.clone(),
            job: self.job.job.clone(),
            step_index,
            status,
            exit_code: None,
        });
    }
}
