// Run Result Model and Aggregator
// Each run owns an independent record tree (arena-style, addressed by
// declaration indices); the scheduler/executor are the only writers and
// readers only ever see fully-written snapshots.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::parser::models::Pipeline;

/// Status shared by steps, jobs, stages, and the run itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub status: RunStatus,
    /// Captured standard output
    pub output: String,
    /// Captured standard error, when any was produced
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    /// Why the step failed or was skipped
    pub reason: Option<String>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub name: String,
    pub display_name: Option<String>,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub display_name: Option<String>,
    pub optional: bool,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub jobs: Vec<JobRecord>,
}

/// The full result tree of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: u64,
    pub pipeline_name: String,
    pub branch: Option<String>,
    pub canceled: bool,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub stages: Vec<StageRecord>,
}

/// Pinpoints the first failing step and the fallout.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub stage: String,
    pub job: Option<String>,
    pub step: Option<String>,
    pub reason: String,
    pub output: String,
    pub skipped_stages: Vec<String>,
}

impl RunRecord {
    /// Build the Pending record tree for one run of a pipeline.
    pub fn new(id: u64, pipeline: &Pipeline, branch: Option<String>) -> Self {
        let stages = pipeline
            .stages
            .iter()
            .map(|stage| StageRecord {
                name: stage.stage.clone(),
                display_name: stage.display_name.clone(),
                optional: stage.optional,
                status: RunStatus::Pending,
                reason: None,
                started_at: None,
                finished_at: None,
                jobs: stage
                    .jobs
                    .iter()
                    .map(|job| JobRecord {
                        name: job.job.clone(),
                        display_name: job.display_name.clone(),
                        status: RunStatus::Pending,
                        reason: None,
                        started_at: None,
                        finished_at: None,
                        steps: job
                            .steps
                            .iter()
                            .map(|step| StepRecord {
                                name: step.name.clone(),
                                display_name: step.display_name.clone(),
                                status: RunStatus::Pending,
                                output: String::new(),
                                error: None,
                                exit_code: None,
                                reason: None,
                                started_at: None,
                                finished_at: None,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            id,
            pipeline_name: pipeline.display_name().to_string(),
            branch,
            canceled: false,
            started_at: SystemTime::now(),
            finished_at: None,
            stages,
        }
    }

    /// Overall run status, derived from the stage statuses.
    ///
    /// Failed the moment any required stage fails. Once every stage is
    /// terminal: Canceled if the run was canceled, Succeeded if every
    /// required stage succeeded (optional stages may be Skipped or Failed),
    /// Failed otherwise (a required stage was skipped as fallout).
    pub fn status(&self) -> RunStatus {
        if self
            .stages
            .iter()
            .any(|s| !s.optional && s.status == RunStatus::Failed)
        {
            return RunStatus::Failed;
        }

        if !self.stages.iter().all(|s| s.status.is_terminal()) {
            return RunStatus::Running;
        }

        if self.canceled || self.stages.iter().any(|s| s.status == RunStatus::Canceled) {
            return RunStatus::Canceled;
        }

        if self
            .stages
            .iter()
            .all(|s| s.optional || s.status == RunStatus::Succeeded)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| end.duration_since(self.started_at).ok())
    }

    /// Locate the first failing step (by declaration order) together with
    /// its captured output and the stages skipped as a consequence.
    pub fn first_failure(&self) -> Option<FailureReport> {
        let skipped_stages: Vec<String> = self
            .stages
            .iter()
            .filter(|s| s.status == RunStatus::Skipped)
            .map(|s| s.name.clone())
            .collect();

        let stage = self
            .stages
            .iter()
            .find(|s| s.status == RunStatus::Failed)?;

        let failed_job = stage.jobs.iter().find(|j| j.status == RunStatus::Failed);
        let failed_step =
            failed_job.and_then(|j| j.steps.iter().find(|s| s.status == RunStatus::Failed));

        let reason = failed_step
            .and_then(|s| s.reason.clone())
            .or_else(|| failed_job.and_then(|j| j.reason.clone()))
            .or_else(|| stage.reason.clone())
            .unwrap_or_else(|| "failed".to_string());

        Some(FailureReport {
            stage: stage.name.clone(),
            job: failed_job.map(|j| j.name.clone()),
            step: failed_step.map(|s| {
                s.name
                    .clone()
                    .or_else(|| s.display_name.clone())
                    .unwrap_or_else(|| "step".to_string())
            }),
            reason,
            output: failed_step
                .map(|s| s.output.clone())
                .unwrap_or_default(),
            skipped_stages,
        })
    }

    // --- mutation helpers, used only by the scheduler/executor ---

    pub(crate) fn stage_mut(&mut self, stage: usize) -> &mut StageRecord {
        &mut self.stages[stage]
    }

    pub(crate) fn job_mut(&mut self, stage: usize, job: usize) -> &mut JobRecord {
        &mut self.stages[stage].jobs[job]
    }

    pub(crate) fn step_mut(&mut self, stage: usize, job: usize, step: usize) -> &mut StepRecord {
        &mut self.stages[stage].jobs[job].steps[step]
    }

    /// Close a job, cascading to steps that never reached a terminal
    /// status: a running step inherits the closing status and reason,
    /// pending steps are skipped (or canceled, when closing as canceled).
    pub(crate) fn finalize_job(&mut self, stage: usize, job: usize, status: RunStatus, reason: &str) {
        let pending_status = if status == RunStatus::Canceled {
            RunStatus::Canceled
        } else {
            RunStatus::Skipped
        };

        let record = &mut self.stages[stage].jobs[job];
        for step in &mut record.steps {
            match step.status {
                RunStatus::Running => {
                    step.status = status;
                    step.reason = Some(reason.to_string());
                    step.finished_at = Some(SystemTime::now());
                }
                RunStatus::Pending => {
                    step.status = pending_status;
                    step.finished_at = Some(SystemTime::now());
                }
                _ => {}
            }
        }
        record.status = status;
        record.reason = Some(reason.to_string());
        record.finished_at = Some(SystemTime::now());
    }

    /// Close a stage, cascading to children that never reached a terminal
    /// status: running children inherit the closing status and reason,
    /// pending children are skipped (or canceled, when closing as canceled).
    pub(crate) fn finalize_stage(&mut self, stage: usize, status: RunStatus, reason: &str) {
        let pending_status = if status == RunStatus::Canceled {
            RunStatus::Canceled
        } else {
            RunStatus::Skipped
        };

        let record = &mut self.stages[stage];
        for job in &mut record.jobs {
            for step in &mut job.steps {
                match step.status {
                    RunStatus::Running => {
                        step.status = status;
                        step.reason = Some(reason.to_string());
                        step.finished_at = Some(SystemTime::now());
                    }
                    RunStatus::Pending => {
                        step.status = pending_status;
                        step.finished_at = Some(SystemTime::now());
                    }
                    _ => {}
                }
            }
            match job.status {
                RunStatus::Running => {
                    job.status = status;
                    job.reason = Some(reason.to_string());
                    job.finished_at = Some(SystemTime::now());
                }
                RunStatus::Pending => {
                    job.status = pending_status;
                    job.finished_at = Some(SystemTime::now());
                }
                _ => {}
            }
        }

        record.status = status;
        record.reason = Some(reason.to_string());
        record.finished_at = Some(SystemTime::now());
    }
}

/// Shared handle onto a run's record tree.
///
/// Cloning is cheap; every clone reads the same tree. Mutation goes through
/// [`RunHandle::update`], which is crate-private: external consumers only
/// query.
#[derive(Debug, Clone)]
pub struct RunHandle {
    inner: Arc<RwLock<RunRecord>>,
}

impl RunHandle {
    pub(crate) fn new(record: RunRecord) -> Self {
        Self {
            inner: Arc::new(RwLock::new(record)),
        }
    }

    /// A fully-written copy of the current record tree.
    pub fn snapshot(&self) -> RunRecord {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn status(&self) -> RunStatus {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .status()
    }

    pub fn first_failure(&self) -> Option<FailureReport> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .first_failure()
    }

    /// Export the record tree as pretty JSON for external reporting.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Apply a write under the lock. Writers never hold the guard across an
    /// await point, so readers only ever observe complete records.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut RunRecord) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::models::Pipeline;

    fn record(yaml: &str) -> RunRecord {
        let pipeline: Pipeline = serde_yaml::from_str(yaml).unwrap();
        RunRecord::new(1, &pipeline, Some("main".to_string()))
    }

    const THREE_STAGES: &str = r#"
name: demo
stages:
  - stage: Build
    jobs:
      - job: B
        steps: [{script: echo b}]
  - stage: Test
    dependsOn: Build
    jobs:
      - job: T
        steps: [{script: echo t}]
  - stage: Deploy
    dependsOn: Test
    jobs:
      - job: D
        steps: [{script: echo d}]
"#;

    #[test]
    fn fresh_run_is_running_with_pending_stages() {
        let run = record(THREE_STAGES);
        assert_eq!(run.status(), RunStatus::Running);
        assert!(run.stages.iter().all(|s| s.status == RunStatus::Pending));
        assert_eq!(run.stages[0].jobs[0].steps.len(), 1);
    }

    #[test]
    fn all_succeeded_means_succeeded() {
        let mut run = record(THREE_STAGES);
        for stage in &mut run.stages {
            stage.status = RunStatus::Succeeded;
        }
        assert_eq!(run.status(), RunStatus::Succeeded);
    }

    #[test]
    fn required_failure_wins_immediately() {
        let mut run = record(THREE_STAGES);
        run.stages[1].status = RunStatus::Failed;
        // Deploy still pending: failure already decides the run.
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn optional_stage_failure_does_not_fail_the_run() {
        let mut run = record(
            r#"
stages:
  - stage: Build
    jobs: [{job: B, steps: [{script: echo}]}]
  - stage: Canary
    optional: true
    jobs: [{job: C, steps: [{script: echo}]}]
"#,
        );
        run.stages[0].status = RunStatus::Succeeded;
        run.stages[1].status = RunStatus::Failed;
        assert_eq!(run.status(), RunStatus::Succeeded);
    }

    #[test]
    fn required_stage_skipped_fails_the_completed_run() {
        let mut run = record(THREE_STAGES);
        run.stages[0].status = RunStatus::Succeeded;
        run.stages[1].status = RunStatus::Skipped;
        run.stages[2].status = RunStatus::Skipped;
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn canceled_run_reports_canceled() {
        let mut run = record(THREE_STAGES);
        run.canceled = true;
        run.stages[0].status = RunStatus::Succeeded;
        run.stages[1].status = RunStatus::Canceled;
        run.stages[2].status = RunStatus::Canceled;
        assert_eq!(run.status(), RunStatus::Canceled);
    }

    #[test]
    fn first_failure_pinpoints_step_and_fallout() {
        let mut run = record(THREE_STAGES);
        run.stages[0].status = RunStatus::Succeeded;
        run.stages[1].status = RunStatus::Failed;
        run.stages[1].jobs[0].status = RunStatus::Failed;
        {
            let step = &mut run.stages[1].jobs[0].steps[0];
            step.status = RunStatus::Failed;
            step.reason = Some("exited with code 1".to_string());
            step.output = "assertion failed".to_string();
        }
        run.stages[2].status = RunStatus::Skipped;

        let report = run.first_failure().unwrap();
        assert_eq!(report.stage, "Test");
        assert_eq!(report.job.as_deref(), Some("T"));
        assert_eq!(report.reason, "exited with code 1");
        assert_eq!(report.output, "assertion failed");
        assert_eq!(report.skipped_stages, vec!["Deploy".to_string()]);
    }

    #[test]
    fn finalize_stage_cascades_to_children() {
        let mut run = record(THREE_STAGES);
        run.stages[0].status = RunStatus::Running;
        run.stages[0].jobs[0].status = RunStatus::Running;
        run.stages[0].jobs[0].steps[0].status = RunStatus::Running;

        run.finalize_stage(0, RunStatus::Failed, "stage timed out");

        let stage = &run.stages[0];
        assert_eq!(stage.status, RunStatus::Failed);
        assert_eq!(stage.jobs[0].status, RunStatus::Failed);
        assert_eq!(stage.jobs[0].steps[0].status, RunStatus::Failed);
        assert_eq!(
            stage.jobs[0].reason.as_deref(),
            Some("stage timed out")
        );
    }

    #[test]
    fn handle_snapshot_is_a_full_copy() {
        let run = record(THREE_STAGES);
        let handle = RunHandle::new(run);
        handle.update(|r| r.stages[0].status = RunStatus::Succeeded);

        let snap = handle.snapshot();
        assert_eq!(snap.stages[0].status, RunStatus::Succeeded);

        let json = handle.to_json().unwrap();
        assert!(json.contains("\"pipeline_name\""));
        assert!(json.contains("succeeded"));
    }
}
